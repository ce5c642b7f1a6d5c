//! The built-in empty scene: clears the buffer once, pushes, and completes.
//! `Reset` is sugar for switching to this scene.

use std::any::Any;

use async_trait::async_trait;

use crate::scene::{Scene, SceneContext};

pub struct ClearScene;

#[async_trait]
impl Scene for ClearScene {
    fn name(&self) -> &str {
        "clear"
    }

    fn wants_loop(&self) -> bool {
        false
    }

    fn new_state(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }

    async fn render(&self, ctx: &mut SceneContext<'_>) -> anyhow::Result<Option<u64>> {
        ctx.device.clear();
        ctx.device.push(false).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DrawSurface, Geometry};
    use crate::metrics::NullMetricsSink;
    use crate::scene::empty_payload;
    use crate::transport::MockTransport;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn clear_scene_pushes_once_and_completes() {
        let mut device = Device::new(
            "dev",
            Geometry {
                width: 2,
                height: 2,
            },
            Arc::new(MockTransport::new(2, 2, Duration::from_millis(0))),
            Arc::new(NullMetricsSink),
        );
        device.framebuffer.draw_pixel(
            0,
            0,
            crate::framebuffer::Rgba::opaque(1, 2, 3),
        );

        let scene = ClearScene;
        let mut state = scene.new_state();
        let surface = DrawSurface::new(&mut device, "clear".to_string(), 1);
        let mut ctx = SceneContext::new(
            surface,
            empty_payload(),
            false,
            crate::scene::DeviceEnv {
                host: "dev".into(),
                width: 2,
                height: 2,
            },
            &mut state,
        );
        let result = scene.render(&mut ctx).await.unwrap();
        assert_eq!(result, None);
        assert!(!scene.wants_loop());
    }
}
