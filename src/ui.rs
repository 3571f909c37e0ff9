use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span, Text},
    widgets::{
        Block, Cell, Clear, Gauge, List, ListItem, Paragraph, Row, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Table, Wrap,
    },
};

use crate::domain::HELP_TEXT;
use crate::model::{Modus, Model, Status};
use crate::window::{ViewWindow, column_span};

pub const TITLE_HEIGHT: usize = 1;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const CMDLINE_HEIGH: usize = 1;
pub const SCROLLBAR_WIDTH: usize = 1;

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

#[derive(Debug, Default)]
pub struct TableUI {
    frame_count: usize,
}

impl TableUI {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        self.frame_count = self.frame_count.wrapping_add(1);

        let [title_area, body_area, cmd_area] = Layout::vertical([
            Constraint::Length(TITLE_HEIGHT as u16),
            Constraint::Min(0),
            Constraint::Length(CMDLINE_HEIGH as u16),
        ])
        .areas(frame.area());

        self.draw_title(model, frame, title_area);

        match model.status {
            Status::EMPTY | Status::QUITTING => draw_empty(frame, body_area),
            Status::LOADING => draw_loading(model, frame, body_area),
            Status::ERROR => draw_error(model, frame, body_area),
            Status::READY => match model.modus() {
                Modus::RECORD => draw_record(model, frame, body_area),
                _ => draw_table(model, frame, body_area),
            },
        }

        match model.modus() {
            Modus::COLUMNS => draw_column_picker(model, frame, body_area),
            Modus::POPUP => draw_help(frame, body_area),
            _ => {}
        }

        draw_cmdline(model, frame, cmd_area);
    }

    fn draw_title(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let mut spans = vec![" delview ".bold().reversed()];
        if let Some(table) = model.table() {
            spans.push(format!(" {} ", table.name()).yellow());
            spans.push(
                format!(" {} of {} rows ", model.filtered_rows(), model.total_rows()).into(),
            );

            let nfilters =
                model.column_filters().len() + usize::from(!model.global_search().is_empty());
            if nfilters > 0 {
                spans.push(format!(" {nfilters} filter(s) ").cyan());
            }

            let visible = model.visible_columns();
            spans.push(format!(" {}/{} columns ", visible.len(), visible.column_count()).into());

            if model.is_filtering() {
                let spinner = SPINNER[self.frame_count % SPINNER.len()];
                spans.push(format!(" {spinner} filtering ").magenta());
            }
        } else if let Some(progress) = model.loading_progress() {
            spans.push(format!(" {} ", progress.file_name).yellow());
        }
        frame.render_widget(Line::from(spans), area);
    }
}

fn draw_empty(frame: &mut Frame, area: Rect) {
    let text = Text::from(vec![
        Line::from("No file loaded".bold()),
        Line::from(""),
        Line::from(vec![
            "Press ".into(),
            "o".blue().bold(),
            " to open a .tsv, .csv, .psv or .txt file, ".into(),
            "?".blue().bold(),
            " for help".into(),
        ]),
    ]);
    let area = center(area, Constraint::Percentage(80), Constraint::Length(5));
    frame.render_widget(Paragraph::new(text).centered(), area);
}

fn draw_loading(model: &Model, frame: &mut Frame, area: Rect) {
    let Some(progress) = model.loading_progress() else {
        return;
    };
    let block = Block::bordered()
        .title(Line::from(" Loading ".bold()).centered())
        .title_bottom(Line::from(vec![" Cancel ".into(), "<Esc> ".blue().bold()]).centered())
        .border_set(border::ROUNDED);
    let label = format!(
        "{}: {:.0}% ({} rows)",
        progress.file_name, progress.percent, progress.rows_parsed
    );
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((progress.percent / 100.0).clamp(0.0, 1.0))
        .label(Span::raw(label));
    let area = center(area, Constraint::Percentage(70), Constraint::Length(3));
    frame.render_widget(gauge, area);
}

fn draw_error(model: &Model, frame: &mut Frame, area: Rect) {
    let message = model.error().unwrap_or("Unknown error");
    let block = Block::bordered()
        .title(Line::from(" Error ".red().bold()).centered())
        .title_bottom(
            Line::from(vec![" Try another file ".into(), "<r> ".blue().bold()]).centered(),
        )
        .border_set(border::THICK);
    let paragraph = Paragraph::new(message.to_string())
        .wrap(Wrap { trim: true })
        .centered()
        .block(block);
    let area = center(area, Constraint::Percentage(70), Constraint::Length(6));
    frame.render_widget(paragraph, area);
}

fn draw_table(model: &Model, frame: &mut Frame, area: Rect) {
    let filtered = model.filtered();
    let visible = model.visible_columns();
    if visible.is_empty() {
        let text = Line::from(vec![
            "All columns are hidden. Press ".into(),
            "c".blue().bold(),
            " to pick columns".into(),
        ]);
        frame.render_widget(Paragraph::new(text).centered(), area);
        return;
    }

    let cursor = model.cursor();
    let layout = model.layout();
    let columns = visible.ordered();
    let span = column_span(&columns, model.widths(), cursor.offset_column, layout.table_width);
    let window = ViewWindow::with_columns(filtered, span.iter().map(|&(c, _)| c).collect());
    let current_column = model.current_column();

    let header = Row::new(window.columns().iter().zip(window.header_cells()).map(|(&c, name)| {
        let style = if model.column_filters().get(c).is_some() {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        Cell::from(name).style(style)
    }))
    .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));

    let viewport = cursor.offset_row..cursor.offset_row + layout.table_height;
    let range = model.window_spec().visible_range(filtered.len(), cursor.offset_row);
    let rows: Vec<Row> = window
        .materialize(range)
        .into_iter()
        .filter(|row| viewport.contains(&row.index))
        .map(|row| {
            let selected_row = row.index == cursor.row;
            Row::new(window.columns().iter().zip(row.cells).map(|(&c, value)| {
                let cell = Cell::from(value);
                if selected_row && Some(c) == current_column {
                    cell.style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    cell
                }
            }))
            .style(if selected_row {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            })
        })
        .collect();

    let widths = span.iter().map(|&(_, w)| Constraint::Length(w as u16));
    let [table_area, scrollbar_area] = Layout::horizontal([
        Constraint::Min(0),
        Constraint::Length(SCROLLBAR_WIDTH as u16),
    ])
    .areas(area);
    frame.render_widget(Table::new(rows, widths).header(header).column_spacing(1), table_area);

    if filtered.is_empty() {
        let text = Line::from(vec![
            "No rows match. Press ".into(),
            "x".blue().bold(),
            " to clear all filters".into(),
        ]);
        let [_, message_area] =
            Layout::vertical([Constraint::Length(2), Constraint::Length(1)]).areas(table_area);
        frame.render_widget(Paragraph::new(text).centered(), message_area);
        return;
    }

    let mut scrollbar_state = ScrollbarState::new(filtered.len()).position(cursor.row);
    frame.render_stateful_widget(
        Scrollbar::new(ScrollbarOrientation::VerticalRight),
        scrollbar_area,
        &mut scrollbar_state,
    );
}

fn draw_record(model: &Model, frame: &mut Frame, area: Rect) {
    let filtered = model.filtered();
    let record = model.record_view();
    let Some(row) = filtered.row(record.record_idx) else {
        return;
    };
    let header = filtered.header();
    let name_width = header.iter().map(|h| h.chars().count()).max().unwrap_or(0) as u16;

    let rows = header
        .iter()
        .enumerate()
        .skip(record.offset)
        .map(|(c, name)| {
            let value = row.get(c).map(String::as_str).unwrap_or("");
            Row::new([Cell::from(name.as_str().bold()), Cell::from(value)])
        });
    let title = format!(
        " Record {} of {} ",
        record.record_idx + 1,
        filtered.len()
    );
    let block = Block::bordered()
        .title(Line::from(title.bold()).centered())
        .title_bottom(
            Line::from(vec![
                " Prev/Next ".into(),
                "<Left>/<Right>".blue().bold(),
                " Back ".into(),
                "<Esc> ".blue().bold(),
            ])
            .centered(),
        )
        .border_set(border::ROUNDED);
    let table = Table::new(rows, [Constraint::Length(name_width), Constraint::Min(0)])
        .column_spacing(2)
        .block(block);
    frame.render_widget(table, area);
}

fn draw_column_picker(model: &Model, frame: &mut Frame, area: Rect) {
    let visible = model.visible_columns();
    let header = model.filtered().header();
    let items: Vec<ListItem> = header
        .iter()
        .enumerate()
        .map(|(c, name)| {
            let mark = if visible.contains(c) { "[x] " } else { "[ ] " };
            let item = ListItem::new(format!("{mark}{name}"));
            if c == model.picker_row() {
                item.style(Style::default().add_modifier(Modifier::REVERSED))
            } else {
                item
            }
        })
        .collect();

    let popup = center(area, Constraint::Percentage(50), Constraint::Percentage(80));
    let height = popup.height.saturating_sub(2) as usize;
    let skip = model.picker_row().saturating_sub(height.saturating_sub(1));
    let block = Block::bordered()
        .title(Line::from(" Columns ".bold()).centered())
        .title_bottom(
            Line::from(vec![
                " Toggle ".into(),
                "<Space>".blue().bold(),
                " All ".into(),
                "<a>".blue().bold(),
                " Close ".into(),
                "<Esc> ".blue().bold(),
            ])
            .centered(),
        )
        .border_set(border::THICK);
    frame.render_widget(Clear, popup);
    frame.render_widget(
        List::new(items.into_iter().skip(skip)).block(block),
        popup,
    );
}

fn draw_help(frame: &mut Frame, area: Rect) {
    let popup = center(area, Constraint::Percentage(60), Constraint::Percentage(80));
    let block = Block::bordered()
        .title(Line::from(" Help ".bold()).centered())
        .title_bottom(Line::from(vec![" Close ".into(), "<Esc> ".blue().bold()]).centered())
        .border_set(border::THICK);
    frame.render_widget(Clear, popup);
    frame.render_widget(Paragraph::new(HELP_TEXT).block(block), popup);
}

fn draw_cmdline(model: &Model, frame: &mut Frame, area: Rect) {
    match model.cmd_line() {
        Some((mode, input)) => {
            let prompt = mode.prompt();
            let line = Line::from(vec![prompt.bold(), Span::raw(input.input.as_str())]);
            frame.render_widget(line, area);
            let x = area.x + (prompt.chars().count() + input.curser_pos) as u16;
            frame.set_cursor_position((x.min(area.right().saturating_sub(1)), area.y));
        }
        None => {
            frame.render_widget(Line::from(model.status_message().dim()), area);
        }
    }
}

fn center(area: Rect, horizontal: Constraint, vertical: Constraint) -> Rect {
    let [area] = Layout::horizontal([horizontal]).flex(Flex::Center).areas(area);
    let [area] = Layout::vertical([vertical]).flex(Flex::Center).areas(area);
    area
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DVConfig;
    use crate::domain::Message;
    use ratatui::{Terminal, backend::TestBackend};
    use std::io::Write;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    fn render(model: &Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        let mut ui = TableUI::new();
        terminal.draw(|f| ui.draw(model, f)).unwrap();
        screen(&terminal)
    }

    #[test]
    fn empty_screen_asks_for_a_file() {
        let model = Model::init(&DVConfig::default(), 80, 24).unwrap();
        assert!(render(&model).contains("No file loaded"));
    }

    #[test]
    fn loaded_table_shows_header_and_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"name,city\nAnn,NY\nBob,LA\n").unwrap();

        let mut model = Model::init(&DVConfig::default(), 80, 24).unwrap();
        model.open(path);
        let deadline = Instant::now() + Duration::from_secs(10);
        while model.status == Status::LOADING && Instant::now() < deadline {
            model.update(None).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }

        let out = render(&model);
        assert!(out.contains("people.csv"));
        assert!(out.contains("2 of 2 rows"));
        assert!(out.contains("city"));
        assert!(out.contains("Bob"));

        model.update(Some(Message::Help)).unwrap();
        assert!(render(&model).contains("Help"));
    }

    #[test]
    fn error_screen_shows_message() {
        let dir = TempDir::new().unwrap();
        let mut model = Model::init(&DVConfig::default(), 80, 24).unwrap();
        model.open(dir.path().join("missing.tsv"));
        let out = render(&model);
        assert!(out.contains("Error"));
        assert!(out.contains("File not found"));
    }
}
