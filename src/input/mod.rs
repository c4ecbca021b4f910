//! Keyboard input encoding for the engine boundary.

pub mod keys;

pub use keys::{KeyCode, KeyEvent, Modifier, codepoint};
