//! Translation between the hook's key/button types and the identifiers stored in recordings.
//!
//! Capture goes through [`identify_key`] and [`identify_button`]; every key the hook can report
//! maps to a non-empty identifier. Replay goes back through [`resolve_key`] and
//! [`resolve_button`].

use crate::{KeyIdentifier, MouseButtonId, SpecialKey};
use rdev::{Button, Key};

/// Virtual key code of the context-menu key, which rdev has no variant for
#[cfg(target_os = "windows")]
const MENU_KEY_CODE: u32 = 0x5D;
#[cfg(target_os = "macos")]
const MENU_KEY_CODE: u32 = 0x6E;
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const MENU_KEY_CODE: u32 = 135;

/// Keypad keys and their platform key codes. Recorded as codes so replay presses the
/// keypad key rather than the main-row key producing the same character.
#[cfg(target_os = "windows")]
const KEYPAD_CODES: &[(Key, u32)] = &[
    (Key::Kp0, 0x60),
    (Key::Kp1, 0x61),
    (Key::Kp2, 0x62),
    (Key::Kp3, 0x63),
    (Key::Kp4, 0x64),
    (Key::Kp5, 0x65),
    (Key::Kp6, 0x66),
    (Key::Kp7, 0x67),
    (Key::Kp8, 0x68),
    (Key::Kp9, 0x69),
    (Key::KpMultiply, 0x6A),
    (Key::KpPlus, 0x6B),
    (Key::KpMinus, 0x6D),
    (Key::KpDivide, 0x6F),
];
#[cfg(target_os = "macos")]
const KEYPAD_CODES: &[(Key, u32)] = &[
    (Key::Kp0, 82),
    (Key::Kp1, 83),
    (Key::Kp2, 84),
    (Key::Kp3, 85),
    (Key::Kp4, 86),
    (Key::Kp5, 87),
    (Key::Kp6, 88),
    (Key::Kp7, 89),
    (Key::Kp8, 91),
    (Key::Kp9, 92),
    (Key::KpMultiply, 67),
    (Key::KpPlus, 69),
    (Key::KpMinus, 78),
    (Key::KpDivide, 75),
];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const KEYPAD_CODES: &[(Key, u32)] = &[
    (Key::Kp0, 90),
    (Key::Kp1, 87),
    (Key::Kp2, 88),
    (Key::Kp3, 89),
    (Key::Kp4, 83),
    (Key::Kp5, 84),
    (Key::Kp6, 85),
    (Key::Kp7, 79),
    (Key::Kp8, 80),
    (Key::Kp9, 81),
    (Key::KpMultiply, 63),
    (Key::KpPlus, 86),
    (Key::KpMinus, 82),
    (Key::KpDivide, 106),
];

/// Printable keys and the unshifted US-layout character they produce
const CHAR_KEYS: &[(Key, char)] = &[
    (Key::KeyA, 'a'),
    (Key::KeyB, 'b'),
    (Key::KeyC, 'c'),
    (Key::KeyD, 'd'),
    (Key::KeyE, 'e'),
    (Key::KeyF, 'f'),
    (Key::KeyG, 'g'),
    (Key::KeyH, 'h'),
    (Key::KeyI, 'i'),
    (Key::KeyJ, 'j'),
    (Key::KeyK, 'k'),
    (Key::KeyL, 'l'),
    (Key::KeyM, 'm'),
    (Key::KeyN, 'n'),
    (Key::KeyO, 'o'),
    (Key::KeyP, 'p'),
    (Key::KeyQ, 'q'),
    (Key::KeyR, 'r'),
    (Key::KeyS, 's'),
    (Key::KeyT, 't'),
    (Key::KeyU, 'u'),
    (Key::KeyV, 'v'),
    (Key::KeyW, 'w'),
    (Key::KeyX, 'x'),
    (Key::KeyY, 'y'),
    (Key::KeyZ, 'z'),
    (Key::Num0, '0'),
    (Key::Num1, '1'),
    (Key::Num2, '2'),
    (Key::Num3, '3'),
    (Key::Num4, '4'),
    (Key::Num5, '5'),
    (Key::Num6, '6'),
    (Key::Num7, '7'),
    (Key::Num8, '8'),
    (Key::Num9, '9'),
    (Key::BackQuote, '`'),
    (Key::Minus, '-'),
    (Key::Equal, '='),
    (Key::LeftBracket, '['),
    (Key::RightBracket, ']'),
    (Key::BackSlash, '\\'),
    (Key::SemiColon, ';'),
    (Key::Quote, '\''),
    (Key::Comma, ','),
    (Key::Dot, '.'),
    (Key::Slash, '/'),
];

/// Shifted US-layout characters and the unshifted character of the same physical key
const SHIFTED_CHARS: &[(char, char)] = &[
    ('~', '`'),
    ('!', '1'),
    ('@', '2'),
    ('#', '3'),
    ('$', '4'),
    ('%', '5'),
    ('^', '6'),
    ('&', '7'),
    ('*', '8'),
    ('(', '9'),
    (')', '0'),
    ('_', '-'),
    ('+', '='),
    ('{', '['),
    ('}', ']'),
    ('|', '\\'),
    (':', ';'),
    ('"', '\''),
    ('<', ','),
    ('>', '.'),
    ('?', '/'),
];

/// Map a key reported by the hook to the identifier stored in recordings
pub fn identify_key(key: Key) -> KeyIdentifier {
    if let Some(special) = special_for_key(key) {
        return KeyIdentifier::Special(special);
    }

    if let Some(code) = keypad_code(key) {
        return KeyIdentifier::Code(code);
    }

    if let Some(c) = char_for_key(key) {
        return KeyIdentifier::Char(c);
    }

    match key {
        Key::Unknown(code) if code == MENU_KEY_CODE => KeyIdentifier::Special(SpecialKey::Menu),
        Key::Unknown(code) => KeyIdentifier::Code(code),
        // rdev reports Fn without a code, so it cannot be replayed
        Key::Function => KeyIdentifier::Unrecognized("Key.fn".to_string()),
        other => KeyIdentifier::Unrecognized(format!("Key.{:?}", other).to_lowercase()),
    }
}

/// Map a recorded identifier back to a key the synthesizer can press.
/// Returns `None` for identifiers with no physical key on this platform.
pub fn resolve_key(id: &KeyIdentifier) -> Option<Key> {
    match id {
        KeyIdentifier::Char(c) => key_for_char(*c),
        KeyIdentifier::Special(special) => Some(key_for_special(*special)),
        KeyIdentifier::Code(code) => Some(keypad_key(*code).unwrap_or(Key::Unknown(*code))),
        KeyIdentifier::Unrecognized(_) | KeyIdentifier::Missing => None,
    }
}

/// Map a button reported by the hook to the identifier stored in recordings
pub fn identify_button(button: Button) -> MouseButtonId {
    match button {
        Button::Left => MouseButtonId::Left,
        Button::Right => MouseButtonId::Right,
        Button::Middle => MouseButtonId::Middle,
        Button::Unknown(code) => MouseButtonId::Other(format!("Button.unknown{}", code)),
    }
}

/// Map a recorded button back to a synthesizable button.
/// The flag is `false` when the identifier was unknown and the left button was substituted.
pub fn resolve_button(id: &MouseButtonId) -> (Button, bool) {
    match id {
        MouseButtonId::Left => (Button::Left, true),
        MouseButtonId::Right => (Button::Right, true),
        MouseButtonId::Middle => (Button::Middle, true),
        MouseButtonId::Other(_) => (Button::Left, false),
    }
}

fn special_for_key(key: Key) -> Option<SpecialKey> {
    let special = match key {
        Key::Alt => SpecialKey::AltL,
        Key::AltGr => SpecialKey::AltGr,
        Key::Backspace => SpecialKey::Backspace,
        Key::CapsLock => SpecialKey::CapsLock,
        Key::MetaLeft => SpecialKey::Cmd,
        Key::MetaRight => SpecialKey::CmdR,
        Key::ControlLeft => SpecialKey::CtrlL,
        Key::ControlRight => SpecialKey::CtrlR,
        Key::Delete | Key::KpDelete => SpecialKey::Delete,
        Key::DownArrow => SpecialKey::Down,
        Key::End => SpecialKey::End,
        Key::Return | Key::KpReturn => SpecialKey::Enter,
        Key::Escape => SpecialKey::Esc,
        Key::F1 => SpecialKey::F1,
        Key::F2 => SpecialKey::F2,
        Key::F3 => SpecialKey::F3,
        Key::F4 => SpecialKey::F4,
        Key::F5 => SpecialKey::F5,
        Key::F6 => SpecialKey::F6,
        Key::F7 => SpecialKey::F7,
        Key::F8 => SpecialKey::F8,
        Key::F9 => SpecialKey::F9,
        Key::F10 => SpecialKey::F10,
        Key::F11 => SpecialKey::F11,
        Key::F12 => SpecialKey::F12,
        Key::Home => SpecialKey::Home,
        Key::Insert => SpecialKey::Insert,
        Key::LeftArrow => SpecialKey::Left,
        Key::NumLock => SpecialKey::NumLock,
        Key::PageDown => SpecialKey::PageDown,
        Key::PageUp => SpecialKey::PageUp,
        Key::Pause => SpecialKey::Pause,
        Key::PrintScreen => SpecialKey::PrintScreen,
        Key::RightArrow => SpecialKey::Right,
        Key::ScrollLock => SpecialKey::ScrollLock,
        Key::ShiftLeft => SpecialKey::Shift,
        Key::ShiftRight => SpecialKey::ShiftR,
        Key::Space => SpecialKey::Space,
        Key::Tab => SpecialKey::Tab,
        Key::UpArrow => SpecialKey::Up,
        _ => return None,
    };
    Some(special)
}

fn key_for_special(special: SpecialKey) -> Key {
    match special {
        SpecialKey::Alt | SpecialKey::AltL => Key::Alt,
        SpecialKey::AltR | SpecialKey::AltGr => Key::AltGr,
        SpecialKey::Backspace => Key::Backspace,
        SpecialKey::CapsLock => Key::CapsLock,
        SpecialKey::Cmd | SpecialKey::CmdL => Key::MetaLeft,
        SpecialKey::CmdR => Key::MetaRight,
        SpecialKey::Ctrl | SpecialKey::CtrlL => Key::ControlLeft,
        SpecialKey::CtrlR => Key::ControlRight,
        SpecialKey::Delete => Key::Delete,
        SpecialKey::Down => Key::DownArrow,
        SpecialKey::End => Key::End,
        SpecialKey::Enter => Key::Return,
        SpecialKey::Esc => Key::Escape,
        SpecialKey::F1 => Key::F1,
        SpecialKey::F2 => Key::F2,
        SpecialKey::F3 => Key::F3,
        SpecialKey::F4 => Key::F4,
        SpecialKey::F5 => Key::F5,
        SpecialKey::F6 => Key::F6,
        SpecialKey::F7 => Key::F7,
        SpecialKey::F8 => Key::F8,
        SpecialKey::F9 => Key::F9,
        SpecialKey::F10 => Key::F10,
        SpecialKey::F11 => Key::F11,
        SpecialKey::F12 => Key::F12,
        SpecialKey::Home => Key::Home,
        SpecialKey::Insert => Key::Insert,
        SpecialKey::Left => Key::LeftArrow,
        SpecialKey::Menu => Key::Unknown(MENU_KEY_CODE),
        SpecialKey::NumLock => Key::NumLock,
        SpecialKey::PageDown => Key::PageDown,
        SpecialKey::PageUp => Key::PageUp,
        SpecialKey::Pause => Key::Pause,
        SpecialKey::PrintScreen => Key::PrintScreen,
        SpecialKey::Right => Key::RightArrow,
        SpecialKey::ScrollLock => Key::ScrollLock,
        SpecialKey::Shift | SpecialKey::ShiftL => Key::ShiftLeft,
        SpecialKey::ShiftR => Key::ShiftRight,
        SpecialKey::Space => Key::Space,
        SpecialKey::Tab => Key::Tab,
        SpecialKey::Up => Key::UpArrow,
    }
}

fn keypad_code(key: Key) -> Option<u32> {
    KEYPAD_CODES
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, code)| *code)
}

fn keypad_key(code: u32) -> Option<Key> {
    KEYPAD_CODES
        .iter()
        .find(|(_, candidate)| *candidate == code)
        .map(|(key, _)| *key)
}

fn char_for_key(key: Key) -> Option<char> {
    if key == Key::IntlBackslash {
        return Some('\\');
    }

    CHAR_KEYS
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, c)| *c)
}

fn key_for_char(c: char) -> Option<Key> {
    match c {
        ' ' => return Some(Key::Space),
        '\t' => return Some(Key::Tab),
        '\n' | '\r' => return Some(Key::Return),
        _ => {}
    }

    let lower = c.to_ascii_lowercase();
    let base = SHIFTED_CHARS
        .iter()
        .find(|(shifted, _)| *shifted == lower)
        .map(|(_, base)| *base)
        .unwrap_or(lower);

    CHAR_KEYS
        .iter()
        .find(|(_, candidate)| *candidate == base)
        .map(|(key, _)| *key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_special_key_resolves() {
        for special in SpecialKey::ALL {
            let id = KeyIdentifier::Special(*special);
            assert!(resolve_key(&id).is_some(), "no key for {}", id);
        }
    }

    #[test]
    fn test_captured_keys_replay_as_the_same_key() {
        let keys = [
            Key::KeyA,
            Key::Num7,
            Key::Slash,
            Key::Return,
            Key::ShiftLeft,
            Key::ShiftRight,
            Key::ControlRight,
            Key::F11,
            Key::Alt,
            Key::AltGr,
            Key::MetaLeft,
            Key::Unknown(0xB3),
            Key::Unknown(MENU_KEY_CODE),
        ];

        for key in keys {
            let id = identify_key(key);
            assert_eq!(resolve_key(&id), Some(key), "{:?} recorded as {}", key, id);
        }
    }

    #[test]
    fn test_keypad_keys_replay_as_keypad_keys() {
        let keypad = [
            Key::Kp0,
            Key::Kp1,
            Key::Kp2,
            Key::Kp3,
            Key::Kp4,
            Key::Kp5,
            Key::Kp6,
            Key::Kp7,
            Key::Kp8,
            Key::Kp9,
            Key::KpPlus,
            Key::KpMinus,
            Key::KpMultiply,
            Key::KpDivide,
        ];

        for key in keypad {
            let id = identify_key(key);
            assert!(matches!(id, KeyIdentifier::Code(_)), "{:?} recorded as {}", key, id);

            let reloaded = KeyIdentifier::parse(&id.to_string());
            assert_eq!(resolve_key(&reloaded), Some(key), "{:?} recorded as {}", key, id);
        }

        assert_eq!(
            identify_key(Key::KpReturn),
            KeyIdentifier::Special(SpecialKey::Enter)
        );
    }

    #[test]
    fn test_codes_outside_the_keypad_stay_raw() {
        assert_eq!(resolve_key(&KeyIdentifier::Code(0xB3)), Some(Key::Unknown(0xB3)));
        // A character typed on the main row still replays there.
        assert_eq!(resolve_key(&KeyIdentifier::Char('+')), Some(Key::Equal));
    }

    #[test]
    fn test_identifiers_are_never_empty() {
        for key in [Key::Function, Key::Unknown(0), Key::KpDelete, Key::IntlBackslash] {
            assert!(!identify_key(key).to_string().is_empty());
        }
    }

    #[test]
    fn test_shifted_and_uppercase_characters_resolve_to_their_physical_key() {
        assert_eq!(resolve_key(&KeyIdentifier::Char('A')), Some(Key::KeyA));
        assert_eq!(resolve_key(&KeyIdentifier::Char('!')), Some(Key::Num1));
        assert_eq!(resolve_key(&KeyIdentifier::Char('"')), Some(Key::Quote));
        assert_eq!(resolve_key(&KeyIdentifier::Char(' ')), Some(Key::Space));
    }

    #[test]
    fn test_unknown_identifiers_do_not_resolve() {
        assert_eq!(resolve_key(&KeyIdentifier::parse("Key.nonexistent")), None);
        assert_eq!(resolve_key(&KeyIdentifier::Char('ж')), None);
        assert_eq!(resolve_key(&KeyIdentifier::Missing), None);
    }

    #[test]
    fn test_unknown_button_falls_back_to_left() {
        assert_eq!(resolve_button(&MouseButtonId::Right), (Button::Right, true));
        assert_eq!(
            resolve_button(&MouseButtonId::Other("Button.x2".to_string())),
            (Button::Left, false)
        );
        assert_eq!(
            identify_button(Button::Unknown(4)),
            MouseButtonId::Other("Button.unknown4".to_string())
        );
    }
}
