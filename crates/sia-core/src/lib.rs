//! sia-core — shared types for the Galaxy SIA receiver: wire framing, text
//! decoding, payload parsing, event assembly, and configuration.
//! `sia-services` and `siad` both depend on this crate.

pub mod codes;
pub mod config;
pub mod event;
pub mod parse;
pub mod text;
pub mod wire;

pub use config::SiaConfig;
pub use event::Event;
pub use wire::{Command, Frame, FrameError};
