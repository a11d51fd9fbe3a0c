//! Key mapping for terminal input
//!
//! Converts key events to VT sequences for the child, to keybind strings
//! for the window manager, and mouse events to report sequences.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Bytes to send to the child for a key, honouring application cursor mode
    pub fn map(event: &KeyEvent, application_cursor: bool) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),
            KeyCode::Enter => Some(vec![0x0D]),
            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }
            KeyCode::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    Some(b"\x1b[Z".to_vec())
                } else {
                    Some(vec![0x09])
                }
            }
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::arrow_key(b'A', mods, application_cursor)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods, application_cursor)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods, application_cursor)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods, application_cursor)),

            KeyCode::Home => Some(Self::special_key(b'H', mods, application_cursor)),
            KeyCode::End => Some(Self::special_key(b'F', mods, application_cursor)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Some(Self::function_key(n, mods)).filter(|b| !b.is_empty()),

            _ => None,
        }
    }

    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
            match ch {
                '@' | '`' | ' ' | '2' => return vec![0x00],
                '[' | '3' => return vec![0x1B],
                '\\' | '4' => return vec![0x1C],
                ']' | '5' => return vec![0x1D],
                '^' | '~' | '6' => return vec![0x1E],
                '_' | '?' | '7' => return vec![0x1F],
                _ => {}
            }
        }

        if mods.contains(Modifiers::CTRL | Modifiers::ALT) && ch.is_ascii_alphabetic() {
            return vec![0x1B, (ch.to_ascii_lowercase() as u8) - b'a' + 1];
        }

        // Alt + key = ESC + key
        if mods.contains(Modifiers::ALT) && !mods.contains(Modifiers::CTRL) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }

    fn arrow_key(key: u8, mods: Modifiers, application_cursor: bool) -> Vec<u8> {
        if !mods.is_empty() {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        } else if application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    fn special_key(key: u8, mods: Modifiers, application_cursor: bool) -> Vec<u8> {
        Self::arrow_key(key, mods, application_cursor)
    }

    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        let code = match n {
            1..=4 => {
                let key = b"PQRS"[(n - 1) as usize] as char;
                return if mods.is_empty() {
                    format!("\x1bO{}", key).into_bytes()
                } else {
                    format!("\x1b[1;{}{}", Self::modifier_code(mods), key).into_bytes()
                };
            }
            5 => 15,
            6..=10 => n + 11,
            11 | 12 => n + 12,
            _ => return Vec::new(),
        };
        Self::tilde_key(code, mods)
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }

    /// Keybind string for a key, e.g. `ctrl+b`, `shift+tab`, `alt+1`, `?`.
    /// Uppercase letters become `shift+<letter>`; shift is implied for
    /// other printable characters.
    pub fn key_string(event: &KeyEvent) -> Option<String> {
        let mods = Modifiers::from(event.modifiers);
        let mut shift = mods.contains(Modifiers::SHIFT);
        let name = match event.code {
            KeyCode::Char(' ') => "space".to_string(),
            KeyCode::Char(c) if c.is_ascii_uppercase() => {
                shift = true;
                c.to_ascii_lowercase().to_string()
            }
            KeyCode::Char(c) => {
                if !c.is_ascii_alphabetic() {
                    shift = false;
                }
                c.to_string()
            }
            KeyCode::Enter => "enter".into(),
            KeyCode::Tab => "tab".into(),
            KeyCode::BackTab => {
                shift = true;
                "tab".into()
            }
            KeyCode::Esc => "esc".into(),
            KeyCode::Backspace => "backspace".into(),
            KeyCode::Up => "up".into(),
            KeyCode::Down => "down".into(),
            KeyCode::Left => "left".into(),
            KeyCode::Right => "right".into(),
            KeyCode::Home => "home".into(),
            KeyCode::End => "end".into(),
            KeyCode::PageUp => "pageup".into(),
            KeyCode::PageDown => "pagedown".into(),
            KeyCode::Insert => "insert".into(),
            KeyCode::Delete => "delete".into(),
            KeyCode::F(n) => format!("f{}", n),
            _ => return None,
        };

        let mut out = String::new();
        if mods.contains(Modifiers::CTRL) {
            out.push_str("ctrl+");
        }
        if mods.contains(Modifiers::ALT) {
            out.push_str("alt+");
        }
        if shift {
            out.push_str("shift+");
        }
        out.push_str(&name);
        Some(out)
    }

    /// Encode a mouse event with window-relative coordinates for a child
    /// that enabled mouse reporting. Empty when the event cannot be encoded.
    pub fn encode_mouse_event(event: &MouseEvent, sgr_mode: bool) -> Vec<u8> {
        let (button, pressed) = match event.kind {
            MouseEventKind::Down(btn) => (Self::mouse_button_code(btn), true),
            MouseEventKind::Up(btn) => (Self::mouse_button_code(btn), false),
            MouseEventKind::Drag(btn) => (Self::mouse_button_code(btn) + 32, true),
            MouseEventKind::Moved => (35, true),
            MouseEventKind::ScrollUp => (64, true),
            MouseEventKind::ScrollDown => (65, true),
            MouseEventKind::ScrollLeft => (66, true),
            MouseEventKind::ScrollRight => (67, true),
        };

        let mut cb = button;
        if event.modifiers.contains(KeyModifiers::SHIFT) {
            cb += 4;
        }
        if event.modifiers.contains(KeyModifiers::ALT) {
            cb += 8;
        }
        if event.modifiers.contains(KeyModifiers::CONTROL) {
            cb += 16;
        }

        let x = event.column.saturating_add(1);
        let y = event.row.saturating_add(1);

        if sgr_mode {
            let suffix = if pressed { 'M' } else { 'm' };
            format!("\x1b[<{};{};{}{}", cb, x, y, suffix).into_bytes()
        } else if x <= 223 && y <= 223 {
            // X10 releases carry no button
            let cb = if pressed { cb } else { 3 | (cb & !3) };
            vec![0x1b, b'[', b'M', cb + 32, x as u8 + 32, y as u8 + 32]
        } else {
            Vec::new()
        }
    }

    fn mouse_button_code(button: MouseButton) -> u8 {
        match button {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    #[test]
    fn test_char_keys() {
        assert_eq!(KeyMapper::map(&key(KeyCode::Char('a'), KeyModifiers::NONE), false), Some(b"a".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::Char('c'), KeyModifiers::CONTROL), false), Some(vec![0x03]));
        assert_eq!(KeyMapper::map(&key(KeyCode::Char('x'), KeyModifiers::ALT), false), Some(vec![0x1B, b'x']));
        assert_eq!(KeyMapper::map(&key(KeyCode::Char('é'), KeyModifiers::NONE), false), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn test_arrow_keys_follow_cursor_mode() {
        let up = key(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&up, false), Some(b"\x1b[A".to_vec()));
        assert_eq!(KeyMapper::map(&up, true), Some(b"\x1bOA".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::Up, KeyModifiers::CONTROL), true), Some(b"\x1b[1;5A".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::Home, KeyModifiers::NONE), true), Some(b"\x1bOH".to_vec()));
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(KeyMapper::map(&key(KeyCode::F(1), KeyModifiers::NONE), false), Some(b"\x1bOP".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::F(5), KeyModifiers::NONE), false), Some(b"\x1b[15~".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::F(8), KeyModifiers::NONE), false), Some(b"\x1b[19~".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::F(12), KeyModifiers::SHIFT), false), Some(b"\x1b[24;2~".to_vec()));
        assert_eq!(KeyMapper::map(&key(KeyCode::F(20), KeyModifiers::NONE), false), None);
    }

    #[test]
    fn test_key_strings() {
        let s = |code, mods| KeyMapper::key_string(&key(code, mods));
        assert_eq!(s(KeyCode::Char('b'), KeyModifiers::CONTROL).as_deref(), Some("ctrl+b"));
        assert_eq!(s(KeyCode::Char('M'), KeyModifiers::SHIFT).as_deref(), Some("shift+m"));
        assert_eq!(s(KeyCode::Char('?'), KeyModifiers::SHIFT).as_deref(), Some("?"));
        assert_eq!(s(KeyCode::BackTab, KeyModifiers::SHIFT).as_deref(), Some("shift+tab"));
        assert_eq!(s(KeyCode::Char('1'), KeyModifiers::ALT).as_deref(), Some("alt+1"));
        assert_eq!(s(KeyCode::Char(' '), KeyModifiers::NONE).as_deref(), Some("space"));
        assert_eq!(s(KeyCode::F(3), KeyModifiers::NONE).as_deref(), Some("f3"));
        assert_eq!(s(KeyCode::Null, KeyModifiers::NONE), None);
    }

    #[test]
    fn test_mouse_encoding_x10() {
        let down = mouse(MouseEventKind::Down(MouseButton::Right), 10, 5);
        assert_eq!(KeyMapper::encode_mouse_event(&down, false), vec![0x1b, b'[', b'M', 34, 43, 38]);
        let up = mouse(MouseEventKind::Up(MouseButton::Left), 0, 0);
        assert_eq!(KeyMapper::encode_mouse_event(&up, false), vec![0x1b, b'[', b'M', 35, 33, 33]);
        let far = mouse(MouseEventKind::Down(MouseButton::Left), 300, 0);
        assert!(KeyMapper::encode_mouse_event(&far, false).is_empty());
    }

    #[test]
    fn test_mouse_encoding_sgr() {
        let down = mouse(MouseEventKind::Down(MouseButton::Left), 0, 0);
        assert_eq!(KeyMapper::encode_mouse_event(&down, true), b"\x1b[<0;1;1M".to_vec());
        let up = mouse(MouseEventKind::Up(MouseButton::Left), 10, 20);
        assert_eq!(KeyMapper::encode_mouse_event(&up, true), b"\x1b[<0;11;21m".to_vec());
        let wheel = mouse(MouseEventKind::ScrollDown, 5, 5);
        assert_eq!(KeyMapper::encode_mouse_event(&wheel, true), b"\x1b[<65;6;6M".to_vec());
    }
}
