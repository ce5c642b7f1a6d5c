//! Built-in scenes the core ships so the scheduler's `Reset` and a
//! process's initial state have something to point at without requiring a
//! caller to register anything first. Otherwise these are ordinary scenes,
//! registered the same way a caller's own would be.

mod clear;
mod fill;
mod startup_info;

pub use clear::ClearScene;
pub use fill::FillScene;
pub use startup_info::StartupInfoScene;

/// The name [`crate::scheduler::DeviceHandle::reset`] switches to.
pub const CLEAR_SCENE_NAME: &str = "clear";

/// Register the three built-in scenes into `registry`.
///
/// # Errors
///
/// Propagates [`crate::error::Error::DuplicateScene`] if a caller already
/// registered a scene under one of these reserved names.
pub fn register_builtins(registry: &mut crate::scene::SceneRegistry) -> crate::error::Result<()> {
    use std::sync::Arc;
    registry.register(Arc::new(ClearScene))?;
    registry.register(Arc::new(FillScene))?;
    registry.register(Arc::new(StartupInfoScene))?;
    Ok(())
}
