//! Per-device rendering scheduler and frame pipeline for small LED-matrix
//! displays.
//!
//! This crate owns the hard core described in its design notes: the
//! per-device scheduler state machine, the buffer/diff/transport frame
//! pipeline, the scene lifecycle contract, and the command gateway that
//! external callers (a message-bus subscriber, typically) drive. It does
//! not open a network listener for commands and does not itself implement
//! scene content beyond the three built-ins needed for `Reset` and a
//! process's initial state.

pub mod config;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod gateway;
mod glyph;
pub mod metrics;
pub mod scene;
pub mod scenes;
pub mod scheduler;
pub mod transport;

pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use gateway::{Command, CommandGateway};
pub use scene::{Scene, SceneContext, SceneRegistry};
