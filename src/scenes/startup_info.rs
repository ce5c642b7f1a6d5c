//! Startup-info scene: draws the device's host name and geometry once.
//! The natural initial scene for a freshly started process before any
//! command has arrived.

use std::any::Any;

use async_trait::async_trait;

use crate::framebuffer::{Alignment, Rgba};
use crate::scene::{Scene, SceneContext};

pub struct StartupInfoScene;

#[async_trait]
impl Scene for StartupInfoScene {
    fn name(&self) -> &str {
        "startup-info"
    }

    fn wants_loop(&self) -> bool {
        false
    }

    fn new_state(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }

    async fn render(&self, ctx: &mut SceneContext<'_>) -> anyhow::Result<Option<u64>> {
        ctx.device.clear();
        let dims = format!("{}X{}", ctx.env.width, ctx.env.height);
        let mid_x = (ctx.env.width / 2) as i32;
        ctx.device
            .draw_text(&ctx.env.host.to_ascii_uppercase(), (0, 0), Rgba::opaque(0, 180, 255), Alignment::Left);
        ctx.device
            .draw_text(&dims, (mid_x, 6), Rgba::opaque(120, 120, 120), Alignment::Center);
        ctx.device.push(false).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DrawSurface, Geometry};
    use crate::metrics::NullMetricsSink;
    use crate::scene::{empty_payload, DeviceEnv};
    use crate::transport::MockTransport;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn draws_something_and_completes() {
        let mut device = Device::new(
            "matrix-1",
            Geometry {
                width: 32,
                height: 16,
            },
            Arc::new(MockTransport::new(32, 16, Duration::from_millis(0))),
            Arc::new(NullMetricsSink),
        );
        let scene = StartupInfoScene;
        let mut state = scene.new_state();
        let surface = DrawSurface::new(&mut device, "startup-info".to_string(), 1);
        let mut ctx = SceneContext::new(
            surface,
            empty_payload(),
            false,
            DeviceEnv {
                host: "matrix-1".into(),
                width: 32,
                height: 16,
            },
            &mut state,
        );
        let result = scene.render(&mut ctx).await.unwrap();
        assert_eq!(result, None);

        let blank = crate::framebuffer::Framebuffer::new(32, 16);
        assert!(ctx.device.diff_count(&blank) > 0);
    }
}
