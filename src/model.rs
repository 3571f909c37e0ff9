use std::path::PathBuf;
use std::sync::Arc;

use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, info, trace, warn};

use crate::config::{DVConfig, expand_path};
use crate::domain::{CMDMode, DVError, Message};
use crate::filter::{ColumnFilters, FilterQuery, FilterWorker, FilteredTable};
use crate::ingest::{IngestSession, IngestUpdate, LoadProgress};
use crate::inputter::{InputResult, Inputter};
use crate::table::Table;
use crate::ui::{CMDLINE_HEIGH, SCROLLBAR_WIDTH, TABLE_HEADER_HEIGHT, TITLE_HEIGHT};
use crate::window::{ColumnWidths, VisibleColumns, WindowSpec, column_span};

/// Worker events handled per update, so a burst of batches cannot stall a frame.
const INGEST_POLL_BUDGET: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    EMPTY,
    LOADING,
    READY,
    ERROR,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modus {
    TABLE,
    RECORD,
    COLUMNS,
    POPUP,
    CMDINPUT,
}

/// Selection and scroll position. `row` indexes the filtered rows, `column`
/// indexes the ordered visible columns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub offset_row: usize,
    pub column: usize,
    pub offset_column: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordView {
    pub record_idx: usize,
    pub offset: usize,
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
    pub table_height: usize,
}

impl UILayout {
    pub fn from_values(ui_width: usize, ui_height: usize) -> Self {
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width: ui_width.saturating_sub(SCROLLBAR_WIDTH),
            table_height: ui_height
                .saturating_sub(TITLE_HEIGHT + TABLE_HEADER_HEIGHT + CMDLINE_HEIGH),
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

pub struct Model {
    config: DVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    ingest: IngestSession,
    filter_worker: FilterWorker,
    table: Option<Arc<Table>>,
    filtered: FilteredTable,
    column_filters: ColumnFilters,
    global_search: String,
    visible_columns: VisibleColumns,
    widths: ColumnWidths,
    cursor: Cursor,
    record_view: RecordView,
    picker_row: usize,
    error: Option<String>,
    uilayout: UILayout,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    input_backup: String,
    clipboard: Option<Clipboard>,
    status_message: String,
}

impl Model {
    pub fn init(config: &DVConfig, ui_width: usize, ui_height: usize) -> Result<Self, DVError> {
        Ok(Self {
            ingest: IngestSession::new(config.parser_options()),
            filter_worker: FilterWorker::spawn()?,
            config: config.clone(),
            status: Status::EMPTY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            table: None,
            filtered: FilteredTable::empty(),
            column_filters: ColumnFilters::default(),
            global_search: String::new(),
            visible_columns: VisibleColumns::default(),
            widths: ColumnWidths::new(0, config.initial_column_width(), config.min_column_width),
            cursor: Cursor::default(),
            record_view: RecordView::default(),
            picker_row: 0,
            error: None,
            uilayout: UILayout::from_values(ui_width, ui_height),
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            input_backup: String::new(),
            clipboard: None,
            status_message: "Press o to open a file, ? for help".to_string(),
        })
    }

    // -------------------- Accessors for the ui ---------------------------- //

    pub fn modus(&self) -> Modus {
        self.modus
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn loading_progress(&self) -> Option<&LoadProgress> {
        self.ingest.progress()
    }

    pub fn table(&self) -> Option<&Arc<Table>> {
        self.table.as_ref()
    }

    pub fn filtered(&self) -> &FilteredTable {
        &self.filtered
    }

    pub fn total_rows(&self) -> usize {
        self.table.as_ref().map(|t| t.row_count()).unwrap_or(0)
    }

    pub fn filtered_rows(&self) -> usize {
        self.filtered.len()
    }

    pub fn column_filters(&self) -> &ColumnFilters {
        &self.column_filters
    }

    pub fn global_search(&self) -> &str {
        &self.global_search
    }

    pub fn visible_columns(&self) -> &VisibleColumns {
        &self.visible_columns
    }

    pub fn widths(&self) -> &ColumnWidths {
        &self.widths
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn record_view(&self) -> RecordView {
        self.record_view
    }

    pub fn picker_row(&self) -> usize {
        self.picker_row
    }

    pub fn layout(&self) -> &UILayout {
        &self.uilayout
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(1, self.uilayout.table_height, self.config.overscan)
    }

    /// A filter recomputation is pending.
    pub fn is_filtering(&self) -> bool {
        self.filter_worker.is_busy()
    }

    pub fn cmd_line(&self) -> Option<(CMDMode, &InputResult)> {
        self.cmd_mode.map(|mode| (mode, &self.last_input))
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Absolute column index under the cursor.
    pub fn current_column(&self) -> Option<usize> {
        self.visible_columns.ordered().get(self.cursor.column).copied()
    }

    pub fn raw_keyevents(&self) -> bool {
        self.modus == Modus::CMDINPUT
    }

    // -------------------- Update loop ------------------------------------- //

    pub fn update(&mut self, message: Option<Message>) -> Result<(), DVError> {
        self.poll_workers();

        let Some(msg) = message else {
            return Ok(());
        };
        trace!("Update: {:?} {:?} {:?}", self.status, self.modus, msg);

        match msg {
            Message::Quit if self.modus != Modus::CMDINPUT => {
                self.quit();
                return Ok(());
            }
            Message::Resize(width, height) => {
                self.ui_resize(width, height);
                return Ok(());
            }
            _ => {}
        }

        match self.modus {
            Modus::CMDINPUT => {
                if let Message::RawKey(key) = msg {
                    self.raw_input(key);
                }
            }
            Modus::POPUP => {
                if matches!(msg, Message::Exit | Message::Help | Message::Enter) {
                    self.close_popup();
                }
            }
            Modus::COLUMNS => self.update_column_picker(msg),
            Modus::RECORD => self.update_record(msg),
            Modus::TABLE => self.update_table(msg),
        }
        Ok(())
    }

    fn update_table(&mut self, msg: Message) {
        // Messages that make sense in every state.
        match msg {
            Message::Help => return self.show_help(),
            Message::OpenFile => return self.enter_cmd_mode(CMDMode::OpenFile),
            Message::NewFile => return self.reset(),
            _ => {}
        }

        match self.status {
            Status::EMPTY | Status::QUITTING => {}
            Status::LOADING => {
                if msg == Message::Exit {
                    self.reset();
                    self.set_status_message("Loading cancelled");
                }
            }
            Status::ERROR => {
                if matches!(msg, Message::Retry | Message::Exit) {
                    self.reset();
                    self.enter_cmd_mode(CMDMode::OpenFile);
                }
            }
            Status::READY => match msg {
                Message::MoveDown => self.move_table_selection_down(1),
                Message::MoveUp => self.move_table_selection_up(1),
                Message::MovePageDown => self.move_table_selection_down(self.page_size()),
                Message::MovePageUp => self.move_table_selection_up(self.page_size()),
                Message::MoveBeginning => self.move_table_selection_beginning(),
                Message::MoveEnd => self.move_table_selection_end(),
                Message::MoveLeft => self.move_table_selection_left(),
                Message::MoveRight => self.move_table_selection_right(),
                Message::MoveToFirstColumn => self.select_column(0),
                Message::MoveToLastColumn => {
                    self.select_column(self.visible_columns.len().saturating_sub(1))
                }
                Message::Search => self.enter_cmd_mode(CMDMode::SearchTable),
                Message::FilterColumn => {
                    if self.current_column().is_some() {
                        self.enter_cmd_mode(CMDMode::FilterColumn)
                    } else {
                        self.set_status_message("No column selected")
                    }
                }
                Message::ClearColumnFilter => self.clear_column_filter(),
                Message::ClearAllFilters => self.clear_all_filters(),
                Message::ColumnPicker => self.open_column_picker(),
                Message::WidenColumn => self.resize_column(1),
                Message::NarrowColumn => self.resize_column(-1),
                Message::Enter => self.build_record_view(),
                Message::CopyCell => self.copy_table_cell(),
                Message::CopyRow => self.copy_table_row(),
                _ => (),
            },
        }
    }

    fn update_record(&mut self, msg: Message) {
        match msg {
            Message::MoveDown => self.move_record_selection(1),
            Message::MoveUp => self.move_record_selection(-1),
            Message::MovePageDown => self.move_record_selection(self.page_size() as isize),
            Message::MovePageUp => self.move_record_selection(-(self.page_size() as isize)),
            Message::MoveLeft => self.previous_record(),
            Message::MoveRight => self.next_record(),
            Message::Help => self.show_help(),
            Message::Exit | Message::Enter => {
                self.modus = Modus::TABLE;
                self.select_row(self.record_view.record_idx);
            }
            _ => (),
        }
    }

    fn update_column_picker(&mut self, msg: Message) {
        let ncols = self.visible_columns.column_count();
        match msg {
            Message::MoveDown => {
                self.picker_row = (self.picker_row + 1).min(ncols.saturating_sub(1))
            }
            Message::MoveUp => self.picker_row = self.picker_row.saturating_sub(1),
            Message::MoveBeginning => self.picker_row = 0,
            Message::MoveEnd => self.picker_row = ncols.saturating_sub(1),
            Message::ToggleColumn => {
                self.visible_columns.toggle(self.picker_row);
                self.after_visibility_change();
            }
            Message::ToggleAllColumns => {
                self.visible_columns.toggle_all();
                self.after_visibility_change();
            }
            Message::Exit | Message::Enter | Message::ColumnPicker => {
                self.modus = Modus::TABLE;
            }
            _ => (),
        }
    }

    /// Pick up parser and filter results that arrived since the last update.
    fn poll_workers(&mut self) {
        for update in self.ingest.poll(INGEST_POLL_BUDGET) {
            match update {
                IngestUpdate::Progress { .. } => {}
                IngestUpdate::Loaded(table) => self.install_table(table),
                IngestUpdate::Failed(e) => self.fail(e),
            }
        }

        if let Some(filtered) = self.filter_worker.poll() {
            debug!(
                "Applying filtered table with {} of {} rows",
                filtered.len(),
                self.total_rows()
            );
            self.filtered = filtered;
            self.clamp_cursor();
            self.clamp_record_view();
            self.set_status_message(format!(
                "{} of {} rows",
                self.filtered.len(),
                self.total_rows()
            ));
        }
    }

    // -------------------- Loading ----------------------------------------- //

    pub fn open(&mut self, path: PathBuf) {
        self.reset();
        match self.ingest.start(path) {
            Ok(()) => {
                self.status = Status::LOADING;
                self.set_status_message("Loading ...");
            }
            Err(e) => self.fail(e),
        }
    }

    fn install_table(&mut self, table: Table) {
        let table = Arc::new(table);
        let ncols = table.column_count();
        info!(
            "Showing {} with {} rows and {} columns",
            table.name(),
            table.row_count(),
            ncols
        );

        self.filter_worker.invalidate();
        self.column_filters.clear_all();
        self.global_search.clear();
        self.visible_columns = VisibleColumns::all(ncols);
        self.widths = ColumnWidths::new(
            ncols,
            self.config.initial_column_width(),
            self.config.min_column_width,
        );
        self.filtered = FilteredTable::unfiltered(Arc::clone(&table));
        self.set_status_message(format!("Loaded {} rows from {}", table.row_count(), table.name()));
        self.table = Some(table);
        self.cursor = Cursor::default();
        self.error = None;
        self.status = Status::READY;
    }

    fn fail(&mut self, error: DVError) {
        warn!("Showing error: {error}");
        self.reset();
        self.set_status_message("Press r to open another file");
        self.error = Some(error.to_string());
        self.status = Status::ERROR;
    }

    /// Back to the empty file selection state.
    pub fn reset(&mut self) {
        self.ingest.cancel();
        self.filter_worker.invalidate();
        self.table = None;
        self.filtered = FilteredTable::empty();
        self.column_filters.clear_all();
        self.global_search.clear();
        self.visible_columns = VisibleColumns::default();
        self.widths = ColumnWidths::new(
            0,
            self.config.initial_column_width(),
            self.config.min_column_width,
        );
        self.cursor = Cursor::default();
        self.record_view = RecordView::default();
        self.picker_row = 0;
        self.error = None;
        self.status = Status::EMPTY;
        self.modus = Modus::TABLE;
        self.set_status_message("Press o to open a file, ? for help");
    }

    pub fn quit(&mut self) {
        self.ingest.cancel();
        self.status = Status::QUITTING;
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout::from_values(width, height);
        self.clamp_cursor();
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    // -------------------- Filtering --------------------------------------- //

    fn request_filter(&mut self) {
        let Some(table) = &self.table else {
            return;
        };
        let query = FilterQuery {
            column_filters: self.column_filters.clone(),
            global_search: self.global_search.clone(),
        };
        self.filter_worker.request(Arc::clone(table), query);
    }

    fn set_global_search(&mut self, term: &str) {
        if self.global_search != term {
            self.global_search = term.to_string();
            self.request_filter();
        }
    }

    fn set_column_filter(&mut self, column: usize, value: &str) {
        let ncols = self.visible_columns.column_count();
        if self.column_filters.set(column, value, ncols) {
            self.request_filter();
        }
    }

    fn clear_column_filter(&mut self) {
        if let Some(column) = self.current_column()
            && self.column_filters.clear(column)
        {
            self.request_filter();
        }
    }

    fn clear_all_filters(&mut self) {
        if self.column_filters.is_empty() && self.global_search.is_empty() {
            return;
        }
        self.column_filters.clear_all();
        self.global_search.clear();
        self.request_filter();
    }

    // -------------------- Command line ------------------------------------ //

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {:?}", mode);
        self.input_backup = match mode {
            CMDMode::OpenFile => String::new(),
            CMDMode::SearchTable => self.global_search.clone(),
            CMDMode::FilterColumn => self
                .current_column()
                .and_then(|c| self.column_filters.get(c))
                .unwrap_or("")
                .to_string(),
        };
        if self.modus != Modus::CMDINPUT {
            self.previous_modus = self.modus;
        }
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.input.clear();
        self.input.set(&self.input_backup);
        self.last_input = self.input.get();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        self.last_input = self.input.read(key);
        let Some(mode) = self.cmd_mode else {
            return;
        };

        if self.last_input.finished {
            let value = if self.last_input.canceled {
                self.input_backup.clone()
            } else {
                self.last_input.input.clone()
            };
            self.leave_cmd_mode();
            match mode {
                CMDMode::OpenFile if !self.last_input.canceled => self.open_path(&value),
                CMDMode::OpenFile => {}
                CMDMode::SearchTable => self.set_global_search(&value),
                CMDMode::FilterColumn => {
                    if let Some(column) = self.current_column() {
                        self.set_column_filter(column, &value);
                    }
                }
            }
        } else if self.last_input.changed {
            let value = self.last_input.input.clone();
            match mode {
                CMDMode::OpenFile => {}
                CMDMode::SearchTable => self.set_global_search(&value),
                CMDMode::FilterColumn => {
                    if let Some(column) = self.current_column() {
                        self.set_column_filter(column, &value);
                    }
                }
            }
        }
    }

    fn leave_cmd_mode(&mut self) {
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;
        self.cmd_mode = None;
    }

    fn open_path(&mut self, input: &str) {
        if input.trim().is_empty() {
            return;
        }
        match expand_path(input) {
            Ok(path) => self.open(path),
            Err(e) => self.fail(e),
        }
    }

    // -------------------- Popups ------------------------------------------ //

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
    }

    fn close_popup(&mut self) {
        self.modus = self.previous_modus;
        self.previous_modus = Modus::POPUP;
    }

    fn open_column_picker(&mut self) {
        self.picker_row = self.current_column().unwrap_or(0);
        self.modus = Modus::COLUMNS;
    }

    fn after_visibility_change(&mut self) {
        debug!(
            "{} of {} columns visible",
            self.visible_columns.len(),
            self.visible_columns.column_count()
        );
        self.clamp_cursor();
    }

    fn resize_column(&mut self, delta: isize) {
        if let Some(column) = self.current_column() {
            let mut width = self.widths.resize(column, delta);
            let max_width = self.config.max_column_width;
            if width > max_width {
                width = self.widths.resize(column, max_width as isize - width as isize);
            }
            trace!("Column {column} is now {width} wide");
            self.ensure_column_visible();
        }
    }

    // -------------------- Record view ------------------------------------- //

    fn build_record_view(&mut self) {
        if self.filtered.is_empty() {
            return;
        }
        self.record_view = RecordView {
            record_idx: self.cursor.row,
            offset: 0,
        };
        self.modus = Modus::RECORD;
    }

    fn move_record_selection(&mut self, delta: isize) {
        let nfields = self.filtered.header().len();
        let max_offset = nfields.saturating_sub(self.uilayout.table_height.max(1));
        self.record_view.offset = self
            .record_view
            .offset
            .saturating_add_signed(delta)
            .min(max_offset);
    }

    /// Keep the record view on an existing row after the filtered rows change.
    fn clamp_record_view(&mut self) {
        if self.filtered.is_empty() {
            self.record_view = RecordView::default();
            if self.modus == Modus::RECORD {
                self.modus = Modus::TABLE;
            }
            return;
        }
        let last = self.filtered.len() - 1;
        self.record_view.record_idx = self.record_view.record_idx.min(last);
    }

    fn previous_record(&mut self) {
        self.record_view.record_idx = self.record_view.record_idx.saturating_sub(1);
    }

    fn next_record(&mut self) {
        if self.record_view.record_idx + 1 < self.filtered.len() {
            self.record_view.record_idx += 1;
        }
    }

    // -------------------- Clipboard --------------------------------------- //

    fn copy_to_clipboard(&mut self, text: String) {
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => {
                    warn!("Clipboard unavailable: {:?}", e);
                    self.set_status_message("Clipboard is not available");
                    return;
                }
            }
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            match clipboard.set_text(text) {
                Ok(_) => self.set_status_message("Copied to clipboard"),
                Err(e) => {
                    trace!("Error copying to clipboard: {:?}", e);
                    self.set_status_message("Copying failed");
                }
            }
        }
    }

    fn copy_table_cell(&mut self) {
        if let Some(column) = self.current_column() {
            let cell = self.filtered.cell(self.cursor.row, column).to_string();
            trace!("Cell content: {}", cell);
            self.copy_to_clipboard(cell);
        }
    }

    fn copy_table_row(&mut self) {
        let Some(row) = self.filtered.row(self.cursor.row) else {
            return;
        };
        let content = row
            .iter()
            .map(|c| wrap_cell_content(c))
            .collect::<Vec<String>>()
            .join(",");
        self.copy_to_clipboard(content);
    }

    // -------------------- Cursor movement --------------------------------- //

    fn page_size(&self) -> usize {
        self.uilayout.table_height.max(1)
    }

    fn select_row(&mut self, row: usize) {
        let nrows = self.filtered.len();
        self.cursor.row = row.min(nrows.saturating_sub(1));
        let height = self.page_size();
        if self.cursor.row < self.cursor.offset_row {
            self.cursor.offset_row = self.cursor.row;
        } else if self.cursor.row >= self.cursor.offset_row + height {
            self.cursor.offset_row = self.cursor.row + 1 - height;
        }
        // Never leave empty space below the last row.
        let max_offset = nrows.saturating_sub(height);
        self.cursor.offset_row = self.cursor.offset_row.min(max_offset);
    }

    fn select_column(&mut self, column: usize) {
        self.cursor.column = column;
        self.ensure_column_visible();
    }

    fn clamp_cursor(&mut self) {
        self.select_row(self.cursor.row);
        self.ensure_column_visible();
    }

    /// Scroll horizontally until the cursor column is fully visible, or is
    /// at least the first column drawn.
    fn ensure_column_visible(&mut self) {
        let columns = self.visible_columns.ordered();
        if columns.is_empty() {
            self.cursor.column = 0;
            self.cursor.offset_column = 0;
            return;
        }
        self.cursor.column = self.cursor.column.min(columns.len() - 1);
        if self.cursor.column < self.cursor.offset_column {
            self.cursor.offset_column = self.cursor.column;
        }
        while self.cursor.offset_column < self.cursor.column {
            let span = column_span(
                &columns,
                &self.widths,
                self.cursor.offset_column,
                self.uilayout.table_width,
            );
            let k = self.cursor.column - self.cursor.offset_column;
            let fully_visible = span
                .get(k)
                .is_some_and(|&(col, width)| width == self.widths.get(col));
            if fully_visible {
                break;
            }
            self.cursor.offset_column += 1;
        }
    }

    fn move_table_selection_beginning(&mut self) {
        self.select_row(0);
    }

    fn move_table_selection_end(&mut self) {
        self.select_row(self.filtered.len().saturating_sub(1));
    }

    fn move_table_selection_up(&mut self, size: usize) {
        self.select_row(self.cursor.row.saturating_sub(size));
    }

    fn move_table_selection_down(&mut self, size: usize) {
        self.select_row(self.cursor.row.saturating_add(size));
    }

    fn move_table_selection_left(&mut self) {
        self.select_column(self.cursor.column.saturating_sub(1));
    }

    fn move_table_selection_right(&mut self) {
        self.select_column(self.cursor.column + 1);
    }
}

/// Quote a cell for a comma separated clipboard line.
fn wrap_cell_content(c: &str) -> String {
    let needs_escaping = c.contains('"');
    let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',' || c == '"');
    let mut out = String::from(c);

    if needs_escaping {
        out = out.replace('"', "\"\"");
    }
    if needs_wrapping {
        out = format!("\"{out}\"");
    }
    out
}
