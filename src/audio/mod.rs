//! Audio subsystem module

pub mod engine;
pub mod file;
pub mod jitter;
pub mod output;

pub use engine::{Advance, AudioEngine, PlaybackMode};
pub use jitter::{JitterBuffer, Packet};
pub use output::{CpalOutput, OutputBus};
