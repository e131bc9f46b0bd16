use crate::{ClickerError, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs::File, io::Write, path::Path};

macro_rules! special_keys {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Named keys that have no single-character representation
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum SpecialKey {
            $($variant),+
        }

        impl SpecialKey {
            /// Every named key, in declaration order
            pub const ALL: &'static [SpecialKey] = &[$(SpecialKey::$variant),+];

            /// The symbolic name used in recordings, without the `Key.` prefix
            pub fn name(self) -> &'static str {
                match self {
                    $(SpecialKey::$variant => $name),+
                }
            }

            /// Look up a named key by its symbolic name
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(SpecialKey::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

special_keys! {
    Alt => "alt",
    AltL => "alt_l",
    AltR => "alt_r",
    AltGr => "alt_gr",
    Backspace => "backspace",
    CapsLock => "caps_lock",
    Cmd => "cmd",
    CmdL => "cmd_l",
    CmdR => "cmd_r",
    Ctrl => "ctrl",
    CtrlL => "ctrl_l",
    CtrlR => "ctrl_r",
    Delete => "delete",
    Down => "down",
    End => "end",
    Enter => "enter",
    Esc => "esc",
    F1 => "f1",
    F2 => "f2",
    F3 => "f3",
    F4 => "f4",
    F5 => "f5",
    F6 => "f6",
    F7 => "f7",
    F8 => "f8",
    F9 => "f9",
    F10 => "f10",
    F11 => "f11",
    F12 => "f12",
    Home => "home",
    Insert => "insert",
    Left => "left",
    Menu => "menu",
    NumLock => "num_lock",
    PageDown => "page_down",
    PageUp => "page_up",
    Pause => "pause",
    PrintScreen => "print_screen",
    Right => "right",
    ScrollLock => "scroll_lock",
    Shift => "shift",
    ShiftL => "shift_l",
    ShiftR => "shift_r",
    Space => "space",
    Tab => "tab",
    Up => "up",
}

/// Identifies a key in a recording.
///
/// Serialized as the character itself (`"a"`), as `"Key.<name>"` for named keys,
/// or as `"<code>"` for keys the hook only reports by virtual key code.
/// Anything else read from a recording is kept verbatim as [`KeyIdentifier::Unrecognized`]
/// so the log round-trips unchanged; replay skips those keys.
/// Recordings may also store `null` for a key that produced no character; that loads as
/// [`KeyIdentifier::Missing`], is written back as `null` and is skipped on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum KeyIdentifier {
    Char(char),
    Special(SpecialKey),
    Code(u32),
    Unrecognized(String),
    Missing,
}

impl KeyIdentifier {
    pub fn parse(raw: &str) -> Self {
        let mut chars = raw.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return KeyIdentifier::Char(c);
        }

        if let Some(key) = raw.strip_prefix("Key.").and_then(SpecialKey::from_name) {
            return KeyIdentifier::Special(key);
        }

        if let Some(code) = raw
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .and_then(|digits| digits.parse().ok())
        {
            return KeyIdentifier::Code(code);
        }

        KeyIdentifier::Unrecognized(raw.to_string())
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyIdentifier::Char(c) => write!(f, "{}", c),
            KeyIdentifier::Special(key) => write!(f, "Key.{}", key.name()),
            KeyIdentifier::Code(code) => write!(f, "<{}>", code),
            KeyIdentifier::Unrecognized(raw) => f.write_str(raw),
            KeyIdentifier::Missing => f.write_str("<none>"),
        }
    }
}

impl From<String> for KeyIdentifier {
    fn from(raw: String) -> Self {
        match KeyIdentifier::parse(&raw) {
            KeyIdentifier::Unrecognized(_) => KeyIdentifier::Unrecognized(raw),
            parsed => parsed,
        }
    }
}

impl From<Option<String>> for KeyIdentifier {
    fn from(raw: Option<String>) -> Self {
        raw.map_or(KeyIdentifier::Missing, KeyIdentifier::from)
    }
}

impl From<KeyIdentifier> for Option<String> {
    fn from(key: KeyIdentifier) -> Self {
        match key {
            KeyIdentifier::Missing => None,
            KeyIdentifier::Unrecognized(raw) => Some(raw),
            other => Some(other.to_string()),
        }
    }
}

/// Identifies a mouse button in a recording (`"Button.left"`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MouseButtonId {
    Left,
    Right,
    Middle,
    /// A button name this crate does not know; replayed as the left button
    Other(String),
}

impl fmt::Display for MouseButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButtonId::Left => f.write_str("Button.left"),
            MouseButtonId::Right => f.write_str("Button.right"),
            MouseButtonId::Middle => f.write_str("Button.middle"),
            MouseButtonId::Other(raw) => f.write_str(raw),
        }
    }
}

impl From<String> for MouseButtonId {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Button.left" => MouseButtonId::Left,
            "Button.right" => MouseButtonId::Right,
            "Button.middle" => MouseButtonId::Middle,
            _ => MouseButtonId::Other(raw),
        }
    }
}

impl From<MouseButtonId> for String {
    fn from(button: MouseButtonId) -> Self {
        match button {
            MouseButtonId::Other(raw) => raw,
            known => known.to_string(),
        }
    }
}

/// The kind-specific part of a recorded action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    MouseMove {
        x: i32,
        y: i32,
    },
    MouseClick {
        x: i32,
        y: i32,
        button: MouseButtonId,
        pressed: bool,
    },
    MouseScroll {
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
    },
    KeyPress {
        key: KeyIdentifier,
    },
    KeyRelease {
        key: KeyIdentifier,
    },
}

impl ActionKind {
    /// The `type` tag used in the persisted format
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::MouseMove { .. } => "mouse_move",
            ActionKind::MouseClick { .. } => "mouse_click",
            ActionKind::MouseScroll { .. } => "mouse_scroll",
            ActionKind::KeyPress { .. } => "key_press",
            ActionKind::KeyRelease { .. } => "key_release",
        }
    }
}

/// One recorded input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Seconds since the recording session started
    pub timestamp: f64,

    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(timestamp: f64, kind: ActionKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn mouse_move(timestamp: f64, x: i32, y: i32) -> Self {
        Self::new(timestamp, ActionKind::MouseMove { x, y })
    }

    pub fn mouse_click(timestamp: f64, x: i32, y: i32, button: MouseButtonId, pressed: bool) -> Self {
        Self::new(
            timestamp,
            ActionKind::MouseClick {
                x,
                y,
                button,
                pressed,
            },
        )
    }

    pub fn mouse_scroll(timestamp: f64, x: i32, y: i32, dx: i32, dy: i32) -> Self {
        Self::new(timestamp, ActionKind::MouseScroll { x, y, dx, dy })
    }

    pub fn key_press(timestamp: f64, key: KeyIdentifier) -> Self {
        Self::new(timestamp, ActionKind::KeyPress { key })
    }

    pub fn key_release(timestamp: f64, key: KeyIdentifier) -> Self {
        Self::new(timestamp, ActionKind::KeyRelease { key })
    }
}

/// An ordered recording of actions.
///
/// Insertion order is capture order, which is not guaranteed to be sorted by
/// timestamp: the pointer and keyboard channels append independently.
/// Serializes as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionLog {
    actions: Vec<Action>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Remove the action at `index`. Neighbor timestamps are left untouched,
    /// so the gaps around the removed action simply widen.
    pub fn remove(&mut self, index: usize) -> Option<Action> {
        if index < self.actions.len() {
            Some(self.actions.remove(index))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.actions
    }

    /// Seconds between the earliest and the latest action
    pub fn span(&self) -> f64 {
        span_of(&self.actions)
    }

    /// A copy sorted by timestamp. The sort is stable, so actions sharing a
    /// timestamp keep their recorded order.
    pub fn sorted(&self) -> Vec<Action> {
        let mut actions = self.actions.clone();
        sort_actions(&mut actions);
        actions
    }

    /// Check that every timestamp can be ordered and is not before the session start
    pub fn validate(&self) -> Result<()> {
        validate_actions(&self.actions)
    }

    /// Serialize the log to the persisted JSON array format
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.actions)?)
    }

    /// Deserialize and validate a log from the persisted JSON array format
    pub fn from_json(json: &str) -> Result<Self> {
        let log: ActionLog = serde_json::from_str(json).map_err(decode_error)?;
        log.validate()?;
        Ok(log)
    }

    /// Deserialize and validate a log from an already parsed JSON document
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let log: ActionLog = serde_json::from_value(value).map_err(decode_error)?;
        log.validate()?;
        Ok(log)
    }

    /// Save the log to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Load a log from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl From<Vec<Action>> for ActionLog {
    fn from(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

impl FromIterator<Action> for ActionLog {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

impl Extend<Action> for ActionLog {
    fn extend<I: IntoIterator<Item = Action>>(&mut self, iter: I) {
        self.actions.extend(iter);
    }
}

impl<'a> IntoIterator for &'a ActionLog {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

impl IntoIterator for ActionLog {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

pub(crate) fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
}

pub(crate) fn span_of(actions: &[Action]) -> f64 {
    let mut timestamps = actions.iter().map(|a| a.timestamp);
    let Some(first) = timestamps.next() else {
        return 0.0;
    };
    let (min, max) = timestamps.fold((first, first), |(min, max), ts| (min.min(ts), max.max(ts)));
    max - min
}

pub(crate) fn validate_actions(actions: &[Action]) -> Result<()> {
    for (index, action) in actions.iter().enumerate() {
        if !action.timestamp.is_finite() || action.timestamp < 0.0 {
            return Err(ClickerError::InvalidActionData(format!(
                "action #{} ({}) has invalid timestamp {}",
                index,
                action.kind.label(),
                action.timestamp
            )));
        }
    }
    Ok(())
}

fn decode_error(err: serde_json::Error) -> ClickerError {
    if err.is_data() {
        ClickerError::InvalidActionData(err.to_string())
    } else {
        ClickerError::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_identifier_parsing() {
        assert_eq!(KeyIdentifier::parse("a"), KeyIdentifier::Char('a'));
        assert_eq!(KeyIdentifier::parse("é"), KeyIdentifier::Char('é'));
        assert_eq!(
            KeyIdentifier::parse("Key.page_down"),
            KeyIdentifier::Special(SpecialKey::PageDown)
        );
        assert_eq!(KeyIdentifier::parse("<65437>"), KeyIdentifier::Code(65437));
        assert_eq!(
            KeyIdentifier::parse("Key.nonexistent"),
            KeyIdentifier::Unrecognized("Key.nonexistent".to_string())
        );
        assert_eq!(
            KeyIdentifier::parse(""),
            KeyIdentifier::Unrecognized(String::new())
        );
    }

    #[test]
    fn test_special_key_names_are_unique() {
        for key in SpecialKey::ALL {
            assert_eq!(SpecialKey::from_name(key.name()), Some(*key));
        }
        assert_eq!(SpecialKey::ALL.len(), 46);
    }

    #[test]
    fn test_action_wire_format() {
        let action = Action::mouse_click(1.25, 10, 20, MouseButtonId::Right, true);
        let value = serde_json::to_value(&action).unwrap();

        assert_eq!(value["type"], "mouse_click");
        assert_eq!(value["timestamp"], 1.25);
        assert_eq!(value["button"], "Button.right");
        assert_eq!(value["pressed"], true);

        let key = Action::key_release(0.5, KeyIdentifier::Special(SpecialKey::Enter));
        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(value["type"], "key_release");
        assert_eq!(value["key"], "Key.enter");
    }

    #[test]
    fn test_unknown_identifiers_survive_a_round_trip() {
        let json = r#"[
            {"type": "key_press", "timestamp": 0.1, "key": "Key.media_play_pause"},
            {"type": "mouse_click", "timestamp": 0.2, "x": 1, "y": 2, "button": "Button.x1", "pressed": false}
        ]"#;

        let log = ActionLog::from_json(json).unwrap();
        let reparsed = ActionLog::from_json(&log.to_json().unwrap()).unwrap();

        assert_eq!(log, reparsed);
        assert_eq!(
            log.as_slice()[1].kind,
            ActionKind::MouseClick {
                x: 1,
                y: 2,
                button: MouseButtonId::Other("Button.x1".to_string()),
                pressed: false,
            }
        );
    }

    #[test]
    fn test_null_key_loads_and_is_written_back_as_null() {
        let json = r#"[
            {"type": "key_press", "timestamp": 0.1, "key": null},
            {"type": "key_release", "timestamp": 0.2, "key": "a"}
        ]"#;

        let log = ActionLog::from_json(json).unwrap();
        assert_eq!(
            log.as_slice()[0].kind,
            ActionKind::KeyPress {
                key: KeyIdentifier::Missing
            }
        );

        let value = serde_json::to_value(&log).unwrap();
        assert!(value[0]["key"].is_null());
        assert_eq!(value[1]["key"], "a");
    }

    #[test]
    fn test_empty_array_is_a_valid_log() {
        let log = ActionLog::from_json("[]").unwrap();
        assert!(log.is_empty());
        assert_eq!(log.span(), 0.0);
    }

    #[test]
    fn test_missing_timestamp_is_invalid_action_data() {
        let json = r#"[{"type": "mouse_move", "x": 1, "y": 2}]"#;
        let err = ActionLog::from_json(json).unwrap_err();
        assert!(matches!(err, ClickerError::InvalidActionData(_)), "{err:?}");
    }

    #[test]
    fn test_non_array_document_is_invalid_action_data() {
        let err = ActionLog::from_json(r#"{"type": "mouse_move"}"#).unwrap_err();
        assert!(matches!(err, ClickerError::InvalidActionData(_)), "{err:?}");

        let err = ActionLog::from_json("not json").unwrap_err();
        assert!(matches!(err, ClickerError::Json(_)), "{err:?}");
    }

    #[test]
    fn test_negative_and_nan_timestamps_are_rejected() {
        let log = ActionLog::from(vec![Action::mouse_move(-0.5, 0, 0)]);
        assert!(matches!(log.validate(), Err(ClickerError::InvalidActionData(_))));

        let log = ActionLog::from(vec![Action::mouse_move(f64::NAN, 0, 0)]);
        assert!(matches!(log.validate(), Err(ClickerError::InvalidActionData(_))));
    }

    #[test]
    fn test_sorted_is_stable_for_equal_timestamps() {
        let log = ActionLog::from(vec![
            Action::mouse_move(0.3, 3, 3),
            Action::mouse_move(0.1, 1, 1),
            Action::mouse_click(0.1, 1, 1, MouseButtonId::Left, true),
            Action::mouse_move(0.2, 2, 2),
        ]);

        let sorted = log.sorted();
        let labels: Vec<_> = sorted.iter().map(|a| a.kind.label()).collect();
        assert_eq!(
            labels,
            vec!["mouse_move", "mouse_click", "mouse_move", "mouse_move"]
        );
        assert_eq!(sorted[0], Action::mouse_move(0.1, 1, 1));
        // The caller's log keeps its capture order.
        assert_eq!(log.as_slice()[0], Action::mouse_move(0.3, 3, 3));
    }

    #[test]
    fn test_remove_keeps_neighbor_timestamps() {
        let mut log = ActionLog::from(vec![
            Action::mouse_move(0.0, 0, 0),
            Action::mouse_move(1.0, 1, 1),
            Action::mouse_move(2.0, 2, 2),
        ]);

        let removed = log.remove(1).unwrap();
        assert_eq!(removed.timestamp, 1.0);
        assert_eq!(log.as_slice()[0].timestamp, 0.0);
        assert_eq!(log.as_slice()[1].timestamp, 2.0);
        assert!(log.remove(5).is_none());
    }

    #[test]
    fn test_span_ignores_order() {
        let log = ActionLog::from(vec![
            Action::mouse_move(2.5, 0, 0),
            Action::mouse_move(0.5, 0, 0),
            Action::mouse_move(1.0, 0, 0),
        ]);
        assert!((log.span() - 2.0).abs() < f64::EPSILON);
    }
}
