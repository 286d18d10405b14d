use crate::host::HostEvent;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub mods: KeyModifiers,
    pub key: String,
}

impl KeyChord {
    pub fn parse(input: &str) -> Option<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return None;
        }

        let mut mods = KeyModifiers::default();
        let mut key: Option<String> = None;

        for part in raw.split('+').map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let token = part.to_ascii_lowercase();
            match token.as_str() {
                "ctrl" | "control" => mods.ctrl = true,
                "alt" | "option" => mods.alt = true,
                "shift" => mods.shift = true,
                "meta" | "cmd" | "command" | "super" | "win" => mods.meta = true,
                _ => {
                    if key.is_some() {
                        return None;
                    }
                    key = Some(token);
                }
            }
        }

        let key = key?;
        Some(Self { mods, key })
    }

    /// The chord's modifiers are held (others may be too) and the key is exactly `key`.
    pub fn is_pressed_by(&self, event: &KeyboardEvent) -> bool {
        let held = event.modifiers();
        (!self.mods.ctrl || held.ctrl)
            && (!self.mods.alt || held.alt)
            && (!self.mods.shift || held.shift)
            && (!self.mods.meta || held.meta)
            && self.key == event.key
    }
}

impl std::fmt::Display for KeyChord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<&str> = Vec::new();
        if self.mods.ctrl {
            parts.push("Ctrl");
        }
        if self.mods.alt {
            parts.push("Alt");
        }
        if self.mods.shift {
            parts.push("Shift");
        }
        if self.mods.meta {
            parts.push("Meta");
        }
        parts.push(&self.key);

        write!(f, "{}", parts.join("+"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEventKind {
    #[default]
    KeyDown,
    KeyUp,
    KeyPress,
}

impl KeyEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyDown => "keydown",
            Self::KeyUp => "keyup",
            Self::KeyPress => "keypress",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "keydown" => Some(Self::KeyDown),
            "keyup" => Some(Self::KeyUp),
            "keypress" => Some(Self::KeyPress),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardEvent {
    #[serde(default, rename = "type")]
    pub kind: KeyEventKind,
    pub key: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, rename = "ctrlKey")]
    pub ctrl: bool,
    #[serde(default, rename = "altKey")]
    pub alt: bool,
    #[serde(default, rename = "shiftKey")]
    pub shift: bool,
    #[serde(default, rename = "metaKey")]
    pub meta: bool,
    #[serde(default)]
    pub target: Option<String>,
}

impl KeyboardEvent {
    pub fn key_down(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn modifiers(&self) -> KeyModifiers {
        KeyModifiers {
            ctrl: self.ctrl,
            alt: self.alt,
            shift: self.shift,
            meta: self.meta,
        }
    }
}

impl HostEvent for KeyboardEvent {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_chords() {
        let chord = KeyChord::parse(" Ctrl + Shift + K ").expect("parse chord");
        assert!(chord.mods.ctrl);
        assert!(chord.mods.shift);
        assert_eq!(chord.key, "k");
        assert_eq!(chord.to_string(), "Ctrl+Shift+k");

        assert!(KeyChord::parse("Ctrl+Shift+O+P").is_none());
        assert!(KeyChord::parse("  ").is_none());
    }

    #[test]
    fn held_modifiers_may_exceed_the_chord() {
        let chord = KeyChord::parse("Ctrl+P").expect("parse chord");
        let plain = KeyboardEvent::key_down("p").with_ctrl();
        let mut with_alt = plain.clone();
        with_alt.alt = true;
        let upper = KeyboardEvent::key_down("P").with_ctrl();

        assert!(chord.is_pressed_by(&plain));
        assert!(chord.is_pressed_by(&with_alt));
        assert!(!chord.is_pressed_by(&upper));
        assert!(!chord.is_pressed_by(&KeyboardEvent::key_down("p")));
    }

    #[test]
    fn event_names_follow_kind() {
        let mut event = KeyboardEvent::key_down("a").with_meta();
        assert_eq!(event.name(), "keydown");
        event.kind = KeyEventKind::KeyUp;
        assert_eq!(event.name(), "keyup");
        assert_eq!(KeyEventKind::from_name("keypress"), Some(KeyEventKind::KeyPress));
        assert_eq!(KeyEventKind::from_name("click"), None);
    }

    #[test]
    fn keyboard_event_reads_dom_field_names() {
        let event: KeyboardEvent =
            serde_json::from_str(r#"{"type":"keyup","key":"s","ctrlKey":true}"#).expect("parse");
        assert_eq!(event.kind, KeyEventKind::KeyUp);
        assert!(event.ctrl);
        assert!(!event.meta);
    }
}
