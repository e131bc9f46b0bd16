//! Input capture and replay
//!
//! This crate records system-wide mouse and keyboard input as timestamped actions
//! and plays them back with the original relative timing, optionally scaled,
//! repeated, or scheduled. Recordings are saved as a JSON array of actions.

pub mod error;
pub mod events;
pub mod keymap;
pub mod player;
pub mod recorder;
pub mod schedule;

pub use error::*;
pub use events::*;
pub use player::*;
pub use recorder::*;
pub use schedule::*;
