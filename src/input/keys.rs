//! Key name → engine keycode / codepoint encoding.
//!
//! The engine understands a fixed keycode space:
//!
//! | range  | keys                                   |
//! |--------|----------------------------------------|
//! | 1–26   | letters `a`–`z`                        |
//! | 27–36  | digits `0`–`9`                         |
//! | 37–49  | punctuation                            |
//! | 50–66  | navigation and control keys            |
//!
//! Key names follow DOM `KeyboardEvent.key` spelling ("ArrowUp", "Enter",
//! "a", ";"). Anything outside the table maps to [`KeyCode::Unmapped`] and
//! is still delivered, with keycode 0.

/// Engine keycode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyCode {
    Unmapped = 0,
    A = 1,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Digit0 = 27,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Semicolon = 37,
    Space,
    Quote,
    Comma,
    Backquote,
    Period,
    Slash,
    Minus,
    Plus,
    Equal,
    BracketLeft,
    BracketRight,
    Backslash,
    ArrowUp = 50,
    ArrowDown,
    ArrowRight,
    ArrowLeft,
    Home,
    End,
    Insert,
    Delete,
    CapsLock,
    ScrollLock,
    NumLock,
    PageUp,
    PageDown,
    Escape,
    Enter,
    Tab,
    Backspace,
}

const LETTERS: [KeyCode; 26] = [
    KeyCode::A, KeyCode::B, KeyCode::C, KeyCode::D, KeyCode::E, KeyCode::F,
    KeyCode::G, KeyCode::H, KeyCode::I, KeyCode::J, KeyCode::K, KeyCode::L,
    KeyCode::M, KeyCode::N, KeyCode::O, KeyCode::P, KeyCode::Q, KeyCode::R,
    KeyCode::S, KeyCode::T, KeyCode::U, KeyCode::V, KeyCode::W, KeyCode::X,
    KeyCode::Y, KeyCode::Z,
];

const DIGITS: [KeyCode; 10] = [
    KeyCode::Digit0, KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3,
    KeyCode::Digit4, KeyCode::Digit5, KeyCode::Digit6, KeyCode::Digit7,
    KeyCode::Digit8, KeyCode::Digit9,
];

impl KeyCode {
    /// Map a key name to its keycode. Case-insensitive.
    pub fn from_name(name: &str) -> Self {
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return Self::from_char(ch);
        }

        match name.to_ascii_lowercase().as_str() {
            "arrowup" => Self::ArrowUp,
            "arrowdown" => Self::ArrowDown,
            "arrowright" => Self::ArrowRight,
            "arrowleft" => Self::ArrowLeft,
            "home" => Self::Home,
            "end" => Self::End,
            "insert" => Self::Insert,
            "delete" => Self::Delete,
            "capslock" => Self::CapsLock,
            "scrolllock" => Self::ScrollLock,
            "numlock" => Self::NumLock,
            "pageup" => Self::PageUp,
            "pagedown" => Self::PageDown,
            "escape" => Self::Escape,
            "enter" => Self::Enter,
            "tab" => Self::Tab,
            "backspace" => Self::Backspace,
            _ => Self::Unmapped,
        }
    }

    fn from_char(ch: char) -> Self {
        match ch.to_ascii_lowercase() {
            c @ 'a'..='z' => LETTERS[(c as u8 - b'a') as usize],
            c @ '0'..='9' => DIGITS[(c as u8 - b'0') as usize],
            ';' => Self::Semicolon,
            ' ' => Self::Space,
            '\'' => Self::Quote,
            ',' => Self::Comma,
            '`' => Self::Backquote,
            '.' => Self::Period,
            '/' => Self::Slash,
            '-' => Self::Minus,
            '+' => Self::Plus,
            '=' => Self::Equal,
            '[' => Self::BracketLeft,
            ']' => Self::BracketRight,
            '\\' => Self::Backslash,
            _ => Self::Unmapped,
        }
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub const fn is_mapped(self) -> bool {
        !matches!(self, Self::Unmapped)
    }
}

/// Codepoint the engine should insert for a key, 0 when it inserts nothing.
///
/// Single-character names map to that character. Enter is carriage return,
/// Backspace is DEL (0x7f). Arrows and every other named key produce 0.
pub fn codepoint(name: &str) -> u32 {
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return ch as u32;
    }
    match name {
        "Enter" => '\r' as u32,
        "Backspace" => 0x7f,
        _ => 0,
    }
}

bitflags::bitflags! {
    /// Keyboard modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifier: u8 {
        const NONE  = 0;
        const SHIFT = 1 << 0;
        const ALT   = 1 << 1;
        const CTRL  = 1 << 2;
        const META  = 1 << 3;
    }
}

/// A key transition as delivered to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub down: bool,
    pub codepoint: u32,
    pub keycode: KeyCode,
    pub modifiers: Modifier,
}

impl KeyEvent {
    /// Encode a named key press or release.
    pub fn from_name(down: bool, name: &str, modifiers: Modifier) -> Self {
        Self {
            down,
            codepoint: codepoint(name),
            keycode: KeyCode::from_name(name),
            modifiers,
        }
    }

    #[inline]
    pub fn shift(&self) -> bool {
        self.modifiers.contains(Modifier::SHIFT)
    }

    #[inline]
    pub fn ctrl(&self) -> bool {
        self.modifiers.contains(Modifier::CTRL)
    }

    #[inline]
    pub fn alt(&self) -> bool {
        self.modifiers.contains(Modifier::ALT)
    }

    #[inline]
    pub fn meta(&self) -> bool {
        self.modifiers.contains(Modifier::META)
    }
}
