use std::time::Duration;
use tracing::trace;

use crate::domain::{DVError, Message};
use crate::model::{Modus, Model};
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(event_poll_time: u64) -> Self {
        Self { event_poll_time }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, DVError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    if model.raw_keyevents() {
                        return Ok(Some(Message::RawKey(key)));
                    }
                    return Ok(map_key(key, model.modus()));
                }
                Event::Resize(width, height) => {
                    return Ok(Some(Message::Resize(width as usize, height as usize)));
                }
                _ => {}
            }
        }
        Ok(None)
    }
}

fn map_key(key: event::KeyEvent, modus: Modus) -> Option<Message> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        let message = match key.code {
            KeyCode::Char('c') => Some(Message::Quit),
            KeyCode::Char('f') => Some(Message::MovePageDown),
            KeyCode::Char('b') => Some(Message::MovePageUp),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        return message;
    }

    let message = match key.code {
        KeyCode::Char('q') => Some(Message::Quit),
        KeyCode::Char('?') => Some(Message::Help),
        KeyCode::Esc => Some(Message::Exit),
        KeyCode::Enter => Some(Message::Enter),

        KeyCode::Up | KeyCode::Char('k') => Some(Message::MoveUp),
        KeyCode::Down | KeyCode::Char('j') => Some(Message::MoveDown),
        KeyCode::Left | KeyCode::Char('h') => Some(Message::MoveLeft),
        KeyCode::Right | KeyCode::Char('l') => Some(Message::MoveRight),
        KeyCode::PageUp => Some(Message::MovePageUp),
        KeyCode::PageDown => Some(Message::MovePageDown),
        KeyCode::Home | KeyCode::Char('g') => Some(Message::MoveBeginning),
        KeyCode::End | KeyCode::Char('G') => Some(Message::MoveEnd),
        KeyCode::Char('0') => Some(Message::MoveToFirstColumn),
        KeyCode::Char('$') => Some(Message::MoveToLastColumn),

        KeyCode::Char('o') => Some(Message::OpenFile),
        KeyCode::Char('n') => Some(Message::NewFile),
        KeyCode::Char('r') => Some(Message::Retry),
        KeyCode::Char('/') => Some(Message::Search),
        KeyCode::Char('f') => Some(Message::FilterColumn),
        KeyCode::Char('F') => Some(Message::ClearColumnFilter),
        KeyCode::Char('x') => Some(Message::ClearAllFilters),
        KeyCode::Char('c') => Some(Message::ColumnPicker),
        KeyCode::Char(' ') if modus == Modus::COLUMNS => Some(Message::ToggleColumn),
        KeyCode::Char('a') if modus == Modus::COLUMNS => Some(Message::ToggleAllColumns),
        KeyCode::Char('>') => Some(Message::WidenColumn),
        KeyCode::Char('<') => Some(Message::NarrowColumn),
        KeyCode::Char('y') => Some(Message::CopyCell),
        KeyCode::Char('Y') => Some(Message::CopyRow),
        _ => None,
    };
    trace!("Mapped: {key:?} => {message:?}");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyEvent;

    fn press(code: KeyCode) -> event::KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn maps_navigation_and_actions() {
        assert_eq!(map_key(press(KeyCode::Char('j')), Modus::TABLE), Some(Message::MoveDown));
        assert_eq!(map_key(press(KeyCode::End), Modus::TABLE), Some(Message::MoveEnd));
        assert_eq!(map_key(press(KeyCode::Char('/')), Modus::TABLE), Some(Message::Search));
        assert_eq!(
            map_key(press(KeyCode::Char('x')), Modus::TABLE),
            Some(Message::ClearAllFilters)
        );
        assert_eq!(map_key(press(KeyCode::F(5)), Modus::TABLE), None);
    }

    #[test]
    fn picker_keys_only_in_column_picker() {
        assert_eq!(map_key(press(KeyCode::Char(' ')), Modus::TABLE), None);
        assert_eq!(map_key(press(KeyCode::Char(' ')), Modus::COLUMNS), Some(Message::ToggleColumn));
        assert_eq!(
            map_key(press(KeyCode::Char('a')), Modus::COLUMNS),
            Some(Message::ToggleAllColumns)
        );
    }

    #[test]
    fn control_keys() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(ctrl_c, Modus::TABLE), Some(Message::Quit));
    }
}
