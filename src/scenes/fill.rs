//! Solid-fill scene: fills the whole buffer with a color taken from the
//! payload's `r`/`g`/`b` (and optional `a`) fields, defaulting to black.
//! Loops so a later `UpdateState` with new color fields takes effect on
//! the next tick without a fresh `SwitchScene`.

use std::any::Any;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::framebuffer::Rgba;
use crate::scene::{Scene, SceneContext};

fn color_from_payload(payload: &Value) -> Rgba {
    let channel = |key: &str| -> u8 {
        payload
            .get(key)
            .and_then(Value::as_u64)
            .map_or(0, |v| v.min(255) as u8)
    };
    let alpha = payload.get("a").and_then(Value::as_u64).map_or(255, |v| v.min(255) as u8);
    Rgba::new(channel("r"), channel("g"), channel("b"), alpha)
}

pub struct FillScene;

#[async_trait]
impl Scene for FillScene {
    fn name(&self) -> &str {
        "fill"
    }

    fn new_state(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }

    async fn render(&self, ctx: &mut SceneContext<'_>) -> anyhow::Result<Option<u64>> {
        if !ctx.payload.is_object() {
            return Err(Error::InvalidPayload.into());
        }
        let color = color_from_payload(&ctx.payload);
        let size = (ctx.device.width(), ctx.device.height());
        ctx.device.draw_rect((0, 0), size, color, true);
        ctx.device.push(false).await?;
        Ok(Some(1_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_channels_default_to_zero() {
        let color = color_from_payload(&serde_json::json!({"r": 200}));
        assert_eq!(color, Rgba::new(200, 0, 0, 255));
    }

    #[test]
    fn alpha_defaults_to_opaque() {
        let color = color_from_payload(&serde_json::json!({}));
        assert_eq!(color, Rgba::new(0, 0, 0, 255));
    }

    #[test]
    fn channel_values_are_clamped_to_u8() {
        let color = color_from_payload(&serde_json::json!({"r": 9000}));
        assert_eq!(color.r, 255);
    }
}
