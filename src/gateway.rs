//! Command Gateway (C6): the only entry point external callers use.
//!
//! Holds one [`DeviceHandle`](crate::scheduler::DeviceHandle) per configured
//! device, built once at construction from [`crate::config::Settings`].
//! Validation here never touches device state — an unknown device or
//! unregistered scene is rejected before anything reaches a scheduler task.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DriverKind;
use crate::error::{Error, Result};
use crate::scene::empty_payload;
use crate::scenes::CLEAR_SCENE_NAME;
use crate::scheduler::DeviceHandle;

/// A normalized, transport-agnostic command as received from the bus
/// subscriber this crate does not itself implement.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    #[serde(rename_all = "kebab-case")]
    SwitchScene {
        device_host: String,
        scene_name: String,
        #[serde(default = "empty_payload")]
        payload: Value,
    },
    #[serde(rename_all = "kebab-case")]
    UpdateState {
        device_host: String,
        payload: Value,
    },
    #[serde(rename_all = "kebab-case")]
    SetDriver {
        device_host: String,
        driver: DriverKind,
    },
    #[serde(rename_all = "kebab-case")]
    Reset {
        device_host: String,
    },
}

impl Command {
    fn device_host(&self) -> &str {
        match self {
            Command::SwitchScene { device_host, .. }
            | Command::UpdateState { device_host, .. }
            | Command::SetDriver { device_host, .. }
            | Command::Reset { device_host } => device_host,
        }
    }
}

/// Routes validated commands to each device's scheduler.
pub struct CommandGateway {
    devices: HashMap<String, DeviceHandle>,
    registry: std::sync::Arc<crate::scene::SceneRegistry>,
}

impl CommandGateway {
    pub fn new(
        devices: HashMap<String, DeviceHandle>,
        registry: std::sync::Arc<crate::scene::SceneRegistry>,
    ) -> Self {
        Self { devices, registry }
    }

    /// Validate and dispatch one command. Returns as soon as the target
    /// scheduler has been notified — scene activation itself is
    /// asynchronous and not awaited here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unrecognized host, or
    /// [`Error::UnregisteredScene`] for a `SwitchScene` naming a scene that
    /// was never registered. `UpdateState` against a scene that is not
    /// currently active is accepted and becomes a no-op inside the
    /// scheduler, per the contract — this function cannot observe whether
    /// a scene is active since that is scheduler-owned state.
    pub fn handle(&self, command: Command) -> Result<()> {
        let handle = self
            .devices
            .get(command.device_host())
            .ok_or_else(|| Error::UnknownDevice(command.device_host().to_string()))?;

        match command {
            Command::SwitchScene {
                scene_name,
                payload,
                ..
            } => {
                if !self.registry.contains(&scene_name) {
                    return Err(Error::UnregisteredScene(scene_name));
                }
                handle.switch_scene(scene_name, payload);
            }
            Command::UpdateState { payload, .. } => {
                handle.update_state(payload);
            }
            Command::SetDriver { driver, .. } => {
                handle.set_driver(driver);
            }
            Command::Reset { .. } => {
                debug_assert!(self.registry.contains(CLEAR_SCENE_NAME));
                handle.reset();
            }
        }
        Ok(())
    }

    pub fn device_handle(&self, host: &str) -> Option<&DeviceHandle> {
        self.devices.get(host)
    }
}
