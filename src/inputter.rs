use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};
use tracing::trace;

/// Single line text input for the command line.
///
/// The cursor counts characters, not bytes.
#[derive(Default)]
pub struct Inputter {
    current_input: String,
    curser_pos: usize,
    finished: bool,
    canceled: bool,
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct InputResult {
    pub input: String,
    pub finished: bool,
    pub canceled: bool,
    pub curser_pos: usize,
    /// The text differs from before this key.
    pub changed: bool,
}

impl Inputter {
    pub fn read(&mut self, key: event::KeyEvent) -> InputResult {
        let before = self.current_input.clone();
        match (key.code, key.modifiers) {
            (KeyCode::Enter, _) => self.finished = true,
            (KeyCode::Esc, _) => {
                self.canceled = true;
                self.finished = true;
            }
            (KeyCode::Backspace, _) => self.backspace(),
            (KeyCode::Delete, _) => self.delete(),
            (KeyCode::Left, _) => self.curser_pos = self.curser_pos.saturating_sub(1),
            (KeyCode::Right, _) => self.curser_pos = (self.curser_pos + 1).min(self.char_count()),
            (KeyCode::Home, _) => self.curser_pos = 0,
            (KeyCode::End, _) => self.curser_pos = self.char_count(),
            (KeyCode::Char('u'), KeyModifiers::CONTROL) => {
                self.current_input.clear();
                self.curser_pos = 0;
            }
            (KeyCode::Char(chr), m) if !m.contains(KeyModifiers::CONTROL) => self.insert(chr),
            (kc, km) => trace!("Ignored input key {kc:?} {km:?}"),
        }
        let mut result = self.get();
        result.changed = before != self.current_input;
        result
    }

    /// Replace the text and put the cursor at its end.
    pub fn set(&mut self, s: &str) {
        self.current_input = s.to_string();
        self.curser_pos = self.char_count();
    }

    pub fn get(&self) -> InputResult {
        InputResult {
            canceled: self.canceled,
            finished: self.finished,
            input: self.current_input.clone(),
            curser_pos: self.curser_pos,
            changed: false,
        }
    }

    pub fn clear(&mut self) {
        self.canceled = false;
        self.finished = false;
        self.current_input.clear();
        self.curser_pos = 0;
    }

    fn insert(&mut self, chr: char) {
        let pos = self.byte_pos(self.curser_pos);
        self.current_input.insert(pos, chr);
        self.curser_pos += 1;
    }

    fn backspace(&mut self) {
        if self.curser_pos > 0 {
            self.curser_pos -= 1;
            let pos = self.byte_pos(self.curser_pos);
            self.current_input.remove(pos);
        }
    }

    fn delete(&mut self) {
        if self.curser_pos < self.char_count() {
            let pos = self.byte_pos(self.curser_pos);
            self.current_input.remove(pos);
        }
    }

    fn char_count(&self) -> usize {
        self.current_input.chars().count()
    }

    fn byte_pos(&self, char_pos: usize) -> usize {
        self.current_input
            .char_indices()
            .nth(char_pos)
            .map(|(byte_idx, _)| byte_idx)
            .unwrap_or(self.current_input.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyEvent;

    fn press(input: &mut Inputter, code: KeyCode) -> InputResult {
        input.read(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_str(input: &mut Inputter, s: &str) {
        for c in s.chars() {
            press(input, KeyCode::Char(c));
        }
    }

    #[test]
    fn typing_and_editing_in_the_middle() {
        let mut input = Inputter::default();
        type_str(&mut input, "zrich");
        press(&mut input, KeyCode::Home);
        press(&mut input, KeyCode::Right);
        let result = press(&mut input, KeyCode::Char('ü'));
        assert_eq!(result.input, "zürich");
        assert!(result.changed);
        assert_eq!(result.curser_pos, 2);

        let result = press(&mut input, KeyCode::Backspace);
        assert_eq!(result.input, "zrich");
        let result = press(&mut input, KeyCode::Delete);
        assert_eq!(result.input, "zich");
    }

    #[test]
    fn movement_does_not_change_text() {
        let mut input = Inputter::default();
        type_str(&mut input, "ab");
        let result = press(&mut input, KeyCode::Left);
        assert!(!result.changed);
        assert_eq!(result.curser_pos, 1);
        let result = press(&mut input, KeyCode::Right);
        let result2 = press(&mut input, KeyCode::Right);
        assert_eq!(result.curser_pos, 2);
        assert_eq!(result2.curser_pos, 2);
    }

    #[test]
    fn enter_and_escape_finish() {
        let mut input = Inputter::default();
        type_str(&mut input, "x");
        let result = press(&mut input, KeyCode::Enter);
        assert!(result.finished && !result.canceled);
        assert_eq!(result.input, "x");

        input.clear();
        let result = press(&mut input, KeyCode::Esc);
        assert!(result.finished && result.canceled);
    }

    #[test]
    fn set_places_cursor_at_end() {
        let mut input = Inputter::default();
        input.set("größe");
        assert_eq!(input.get().curser_pos, 5);
        let result = press(&mut input, KeyCode::Backspace);
        assert_eq!(result.input, "größ");
    }

    #[test]
    fn ctrl_u_clears() {
        let mut input = Inputter::default();
        type_str(&mut input, "abc");
        let result = input.read(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        assert_eq!(result.input, "");
        assert!(result.changed);
    }
}
