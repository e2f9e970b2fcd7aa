use std::mem;

use glam::Vec2;
use winit::keyboard::{KeyCode as WinitKey, PhysicalKey};

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Digit(u8),
    Function(u8),
}

impl KeyCode {
    /// Parses short names (`W`, `Space`, `F5`) as well as DOM-style codes
    /// (`KeyW`, `Digit1`, `ArrowUp`).
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = parse_named_key(name) {
            return Some(key);
        }
        let name = name
            .strip_prefix("Key")
            .filter(|rest| rest.len() == 1)
            .or_else(|| name.strip_prefix("Digit").filter(|rest| rest.len() == 1))
            .unwrap_or(name);
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if ch.is_ascii_alphabetic() {
                return Some(Self::Character(ch.to_ascii_uppercase()));
            }
            if let Some(digit) = ch.to_digit(10) {
                return Some(Self::Digit(digit as u8));
            }
        }
        if let Some(function) = name.strip_prefix('F').or_else(|| name.strip_prefix('f')) {
            if let Ok(index) = function.parse::<u8>() {
                if (1..=24).contains(&index) {
                    return Some(Self::Function(index));
                }
            }
        }
        None
    }

    /// Maps a winit physical key; keys without a counterpart yield `None`.
    pub fn from_winit(key: PhysicalKey) -> Option<Self> {
        let PhysicalKey::Code(code) = key else {
            return None;
        };
        use NamedKey::*;
        Some(match code {
            WinitKey::Space => Self::Named(Space),
            WinitKey::Enter => Self::Named(Enter),
            WinitKey::Tab => Self::Named(Tab),
            WinitKey::ArrowLeft => Self::Named(Left),
            WinitKey::ArrowRight => Self::Named(Right),
            WinitKey::ArrowUp => Self::Named(Up),
            WinitKey::ArrowDown => Self::Named(Down),
            WinitKey::Escape => Self::Named(Escape),
            WinitKey::Backspace => Self::Named(Backspace),
            WinitKey::ShiftLeft => Self::Named(LeftShift),
            WinitKey::ShiftRight => Self::Named(RightShift),
            WinitKey::ControlLeft => Self::Named(LeftCtrl),
            WinitKey::ControlRight => Self::Named(RightCtrl),
            WinitKey::AltLeft => Self::Named(LeftAlt),
            WinitKey::AltRight => Self::Named(RightAlt),
            WinitKey::Digit0 => Self::Digit(0),
            WinitKey::Digit1 => Self::Digit(1),
            WinitKey::Digit2 => Self::Digit(2),
            WinitKey::Digit3 => Self::Digit(3),
            WinitKey::Digit4 => Self::Digit(4),
            WinitKey::Digit5 => Self::Digit(5),
            WinitKey::Digit6 => Self::Digit(6),
            WinitKey::Digit7 => Self::Digit(7),
            WinitKey::Digit8 => Self::Digit(8),
            WinitKey::Digit9 => Self::Digit(9),
            WinitKey::KeyA => Self::Character('A'),
            WinitKey::KeyB => Self::Character('B'),
            WinitKey::KeyC => Self::Character('C'),
            WinitKey::KeyD => Self::Character('D'),
            WinitKey::KeyE => Self::Character('E'),
            WinitKey::KeyF => Self::Character('F'),
            WinitKey::KeyG => Self::Character('G'),
            WinitKey::KeyH => Self::Character('H'),
            WinitKey::KeyI => Self::Character('I'),
            WinitKey::KeyJ => Self::Character('J'),
            WinitKey::KeyK => Self::Character('K'),
            WinitKey::KeyL => Self::Character('L'),
            WinitKey::KeyM => Self::Character('M'),
            WinitKey::KeyN => Self::Character('N'),
            WinitKey::KeyO => Self::Character('O'),
            WinitKey::KeyP => Self::Character('P'),
            WinitKey::KeyQ => Self::Character('Q'),
            WinitKey::KeyR => Self::Character('R'),
            WinitKey::KeyS => Self::Character('S'),
            WinitKey::KeyT => Self::Character('T'),
            WinitKey::KeyU => Self::Character('U'),
            WinitKey::KeyV => Self::Character('V'),
            WinitKey::KeyW => Self::Character('W'),
            WinitKey::KeyX => Self::Character('X'),
            WinitKey::KeyY => Self::Character('Y'),
            WinitKey::KeyZ => Self::Character('Z'),
            WinitKey::F1 => Self::Function(1),
            WinitKey::F2 => Self::Function(2),
            WinitKey::F3 => Self::Function(3),
            WinitKey::F4 => Self::Function(4),
            WinitKey::F5 => Self::Function(5),
            WinitKey::F6 => Self::Function(6),
            WinitKey::F7 => Self::Function(7),
            WinitKey::F8 => Self::Function(8),
            WinitKey::F9 => Self::Function(9),
            WinitKey::F10 => Self::Function(10),
            WinitKey::F11 => Self::Function(11),
            WinitKey::F12 => Self::Function(12),
            _ => return None,
        })
    }
}

fn parse_named_key(name: &str) -> Option<KeyCode> {
    use NamedKey::*;
    let key = match name {
        "Space" => Space,
        "Enter" | "Return" => Enter,
        "Tab" => Tab,
        "Left" | "ArrowLeft" => Left,
        "Right" | "ArrowRight" => Right,
        "Up" | "ArrowUp" => Up,
        "Down" | "ArrowDown" => Down,
        "Escape" | "Esc" => Escape,
        "Backspace" => Backspace,
        "LeftShift" | "ShiftLeft" => LeftShift,
        "RightShift" | "ShiftRight" => RightShift,
        "LeftCtrl" | "ControlLeft" => LeftCtrl,
        "RightCtrl" | "ControlRight" => RightCtrl,
        "LeftAlt" | "AltLeft" => LeftAlt,
        "RightAlt" | "AltRight" => RightAlt,
        _ => return None,
    };
    Some(KeyCode::Named(key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Escape,
    Backspace,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
    LeftAlt,
    RightAlt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

/// A keyboard transition. `repeat` marks auto-repeated presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub state: KeyState,
    pub repeat: bool,
}

impl KeyEvent {
    pub fn pressed(code: KeyCode) -> Self {
        Self {
            code,
            state: KeyState::Pressed,
            repeat: false,
        }
    }

    pub fn released(code: KeyCode) -> Self {
        Self {
            code,
            state: KeyState::Released,
            repeat: false,
        }
    }
}

/// A 2D pointer offset in screen units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerPosition {
    pub x: f32,
    pub y: f32,
}

impl From<PointerPosition> for Vec2 {
    fn from(position: PointerPosition) -> Self {
        Vec2::new(position.x, position.y)
    }
}

/// Turns raw pointer and keyboard signals into per-frame polls.
///
/// Relative motion is accumulated while capture is active. Polling returns
/// the motion since the previous poll; the vertical axis is flipped so that
/// moving the pointer up yields a positive `y`.
#[derive(Debug, Default)]
pub struct InputHandler {
    capturing: bool,
    accumulated: Vec2,
    last_polled: Vec2,
    key_events: Vec<KeyEvent>,
}

impl InputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_capture(&mut self) {
        self.capturing = true;
    }

    pub fn end_capture(&mut self) {
        self.capturing = false;
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Adds relative motion (`+y` pointing down the screen). Ignored unless capturing.
    pub fn handle_pointer_motion(&mut self, dx: f32, dy: f32) {
        if self.capturing {
            self.accumulated += Vec2::new(dx, dy);
        }
    }

    /// Buffers a key transition. Ignored unless capturing.
    pub fn handle_key(&mut self, event: KeyEvent) {
        if self.capturing {
            self.key_events.push(event);
        }
    }

    pub fn poll_pointer_delta(&mut self) -> PointerPosition {
        let delta = PointerPosition {
            x: self.accumulated.x - self.last_polled.x,
            y: self.last_polled.y - self.accumulated.y,
        };
        self.last_polled = self.accumulated;
        delta
    }

    /// Drains the buffered key events in arrival order.
    pub fn poll_key_events(&mut self) -> Vec<KeyEvent> {
        mem::take(&mut self.key_events)
    }
}
