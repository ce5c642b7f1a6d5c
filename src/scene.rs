//! Scene registry and contract (C3).
//!
//! A scene is a record of init/render/cleanup callables plus a `wants_loop`
//! flag, registered once at startup and treated as an opaque plug-in from
//! then on. Per-scene state is redesigned away from the untyped key/value
//! bag: a scene declares its own state type and gets it back type-erased
//! behind [`std::any::Any`], so the scheduler owns the slot without ever
//! needing to know its shape.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::device::DrawSurface;
use crate::error::{Error, Result};

/// Arbitrary key-value payload carried by a command and handed to a scene.
pub type Payload = Value;

pub fn empty_payload() -> Payload {
    Value::Object(Map::new())
}

/// Read-only device info handed to a scene through its context.
#[derive(Debug, Clone)]
pub struct DeviceEnv {
    pub host: String,
    pub width: u32,
    pub height: u32,
}

/// Execution context a scheduler builds for every init/render/cleanup call.
pub struct SceneContext<'a> {
    pub device: DrawSurface<'a>,
    pub payload: Payload,
    pub loop_driven: bool,
    pub env: DeviceEnv,
    state: &'a mut Box<dyn Any + Send>,
}

impl<'a> SceneContext<'a> {
    pub fn new(
        device: DrawSurface<'a>,
        payload: Payload,
        loop_driven: bool,
        env: DeviceEnv,
        state: &'a mut Box<dyn Any + Send>,
    ) -> Self {
        Self {
            device,
            payload,
            loop_driven,
            env,
            state,
        }
    }

    /// Typed access to this scene's own state slot, created fresh by
    /// [`Scene::new_state`] at switch time and dropped at cleanup.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the type the scene's `new_state`
    /// produced — a scene-author bug, not a runtime condition callers need
    /// to recover from.
    pub fn state<T: 'static>(&mut self) -> &mut T {
        self.state
            .downcast_mut::<T>()
            .expect("scene state type does not match Scene::new_state")
    }

    /// Convenience accessor for a single key inside the JSON payload.
    pub fn payload_get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// A registered rendering program.
#[async_trait]
pub trait Scene: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    /// Whether the scheduler should keep ticking this scene after its
    /// first render, driven by the render's own returned delay.
    fn wants_loop(&self) -> bool {
        true
    }

    /// Restrict this scene to devices with one of these `(width, height)`
    /// geometries. `None` means the scene runs on any device.
    fn device_geometries(&self) -> Option<&'static [(u32, u32)]> {
        None
    }

    /// Build this scene's fresh, typed state box. Called once per switch,
    /// before `init`.
    fn new_state(&self) -> Box<dyn Any + Send>;

    async fn init(&self, _ctx: &mut SceneContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Render one frame. Returns `Some(delay_ms)` to request another tick
    /// after `delay_ms` milliseconds (`0` means as soon as possible), or
    /// `None` to signal completion — the scheduler will not tick again
    /// until re-triggered by a command.
    async fn render(&self, ctx: &mut SceneContext<'_>) -> anyhow::Result<Option<u64>>;

    async fn cleanup(&self, _ctx: &mut SceneContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Process-wide, fixed-after-startup name -> scene mapping.
#[derive(Default)]
pub struct SceneRegistry {
    scenes: HashMap<String, Arc<dyn Scene>>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scene.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSceneDescriptor`] for an empty name, or
    /// [`Error::DuplicateScene`] if the name is already registered.
    pub fn register(&mut self, scene: Arc<dyn Scene>) -> Result<()> {
        let name = scene.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidSceneDescriptor(
                name,
                "scene name must not be empty".to_string(),
            ));
        }
        if self.scenes.contains_key(&name) {
            return Err(Error::DuplicateScene(name));
        }
        self.scenes.insert(name, scene);
        Ok(())
    }

    /// Look up a scene by name, checking it against the device's geometry
    /// when the scene declares a filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredScene`] when the name is unknown.
    pub fn resolve(&self, name: &str, width: u32, height: u32) -> Result<Arc<dyn Scene>> {
        let scene = self
            .scenes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnregisteredScene(name.to_string()))?;

        if let Some(geometries) = scene.device_geometries() {
            if !geometries.contains(&(width, height)) {
                return Err(Error::UnregisteredScene(format!(
                    "{name} does not support {width}x{height}"
                )));
            }
        }
        Ok(scene)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }
}
