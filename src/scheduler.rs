//! Per-device scheduler (C4) — the hardest part.
//!
//! One scheduler task per device, holding `idle -> starting -> running ->
//! stopping -> idle` as plain control flow rather than a generic state
//! machine type, since nothing outside this task may ever interleave with
//! it: suspension only happens at `await` points the loop itself chooses
//! (init completion, render completion, cleanup completion, ticker
//! expiry), so the "at most one push in flight" and "strictly sequential
//! renders" guarantees fall out of there simply being one task.
//!
//! Commands arrive through an [`Inbox`] rather than an ordinary channel:
//! each command kind gets exactly one slot, so a burst of `SwitchScene`
//! commands collapses to "the most recent target" and repeated
//! `UpdateState` calls merge onto a single pending payload instead of
//! queueing — the bounded-queue-with-backpressure requirement from the
//! concurrency model, expressed as overwrite-in-place rather than an
//! actual bounded `mpsc`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::DriverKind;
use crate::device::{Device, DrawSurface, Geometry, PushMetrics};
use crate::metrics::MetricsSink;
use crate::scene::{empty_payload, DeviceEnv, Scene, SceneContext, SceneRegistry};
use crate::scenes::CLEAR_SCENE_NAME;
use crate::transport::Transport;

/// Observable scheduler status, mirroring the state machine in the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct PendingSwitch {
    scene_name: String,
    payload: Value,
}

#[derive(Default)]
struct InboxState {
    switch: Option<PendingSwitch>,
    update: Option<Value>,
    set_driver: Option<DriverKind>,
}

impl InboxState {
    fn has_activation(&self) -> bool {
        self.switch.is_some() || self.set_driver.is_some()
    }
}

/// Merge `incoming` onto `existing`: object keys overlay, anything else
/// (including a non-object replacing a non-object) replaces outright.
fn merge_payload(existing: &mut Value, incoming: Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(obj), Value::Object(incoming_obj)) => {
            for (k, v) in incoming_obj {
                obj.insert(k, v);
            }
        }
        (_, incoming) => *existing = incoming,
    }
}

struct Inbox {
    state: Mutex<InboxState>,
    notify: Notify,
}

impl Inbox {
    fn new() -> Self {
        Self {
            state: Mutex::new(InboxState::default()),
            notify: Notify::new(),
        }
    }

    fn switch_scene(&self, scene_name: String, payload: Value) {
        let mut state = self.state.lock().unwrap();
        state.switch = Some(PendingSwitch { scene_name, payload });
        drop(state);
        self.notify.notify_one();
    }

    fn update_state(&self, payload: Value) {
        let mut state = self.state.lock().unwrap();
        match state.update.as_mut() {
            Some(existing) => merge_payload(existing, payload),
            None => state.update = Some(payload),
        }
        drop(state);
        self.notify.notify_one();
    }

    fn set_driver(&self, driver: DriverKind) {
        let mut state = self.state.lock().unwrap();
        state.set_driver = Some(driver);
        drop(state);
        self.notify.notify_one();
    }

    fn has_activation(&self) -> bool {
        self.state.lock().unwrap().has_activation()
    }

    fn take_update(&self) -> Option<Value> {
        self.state.lock().unwrap().update.take()
    }

    fn take_activation(&self) -> (Option<PendingSwitch>, Option<DriverKind>) {
        let mut state = self.state.lock().unwrap();
        (state.switch.take(), state.set_driver.take())
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// A cheap, cloneable handle to a running device scheduler. This is what
/// the command gateway (C6) and tests hold; the scheduler task itself owns
/// the only mutable access to the device's framebuffer.
#[derive(Clone)]
pub struct DeviceHandle {
    pub host: String,
    pub geometry: Geometry,
    inbox: Arc<Inbox>,
    metrics: Arc<Mutex<PushMetrics>>,
}

impl DeviceHandle {
    pub fn switch_scene(&self, scene_name: impl Into<String>, payload: Value) {
        self.inbox.switch_scene(scene_name.into(), payload);
    }

    pub fn update_state(&self, payload: Value) {
        self.inbox.update_state(payload);
    }

    pub fn set_driver(&self, driver: DriverKind) {
        self.inbox.set_driver(driver);
    }

    /// Equivalent to switching to the built-in empty scene.
    pub fn reset(&self) {
        self.inbox
            .switch_scene(CLEAR_SCENE_NAME.to_string(), empty_payload());
    }

    pub fn metrics(&self) -> PushMetrics {
        self.metrics.lock().unwrap().clone()
    }
}

struct ActiveScene {
    scene: Arc<dyn Scene>,
    state: Box<dyn Any + Send>,
    payload: Value,
}

/// The running state machine for one device.
pub struct DeviceScheduler {
    device: Device,
    registry: Arc<SceneRegistry>,
    inbox: Arc<Inbox>,
    shared_metrics: Arc<Mutex<PushMetrics>>,
    transports: HashMap<DriverKind, Arc<dyn Transport>>,
    generation: u64,
    active: Option<ActiveScene>,
    status: Status,
    next_tick: Option<Instant>,
    /// Captured scene name/payload of whatever was active right before a
    /// `SetDriver`-only stop, so the scene can resume without the caller
    /// having to know it.
    restart_target: Option<(String, Value)>,
}

/// Spawn a device's scheduler task and return a handle to it.
pub fn spawn(
    host: impl Into<String>,
    geometry: Geometry,
    registry: Arc<SceneRegistry>,
    transports: HashMap<DriverKind, Arc<dyn Transport>>,
    initial_driver: DriverKind,
    metrics_sink: Arc<dyn MetricsSink>,
) -> DeviceHandle {
    let host = host.into();
    let transport = transports
        .get(&initial_driver)
        .cloned()
        .unwrap_or_else(|| panic!("no transport configured for driver {initial_driver:?}"));

    let device = Device::new(host.clone(), geometry, transport, metrics_sink);
    let inbox = Arc::new(Inbox::new());
    let shared_metrics = Arc::new(Mutex::new(PushMetrics::default()));

    let handle = DeviceHandle {
        host,
        geometry,
        inbox: Arc::clone(&inbox),
        metrics: Arc::clone(&shared_metrics),
    };

    let scheduler = DeviceScheduler {
        device,
        registry,
        inbox,
        shared_metrics,
        transports,
        generation: 0,
        active: None,
        status: Status::Idle,
        next_tick: None,
        restart_target: None,
    };

    tokio::spawn(scheduler.run());
    handle
}

impl DeviceScheduler {
    async fn run(mut self) {
        loop {
            match self.status {
                Status::Idle => self.step_idle().await,
                Status::Starting => self.step_starting().await,
                Status::Running => self.step_running().await,
                Status::Stopping => self.step_stopping().await,
            }
        }
    }

    fn env(&self) -> DeviceEnv {
        DeviceEnv {
            host: self.device.host.clone(),
            width: self.device.geometry.width,
            height: self.device.geometry.height,
        }
    }

    /// Apply any pending `UpdateState` onto whatever is currently active.
    /// A bare update with nothing active is a no-op, per the contract.
    /// `UpdateState` replaces the payload outright rather than merging —
    /// merging is reserved for coalescing multiple pending `UpdateState`s
    /// in the inbox before either one has been applied.
    fn apply_pending_update(&mut self) {
        if let Some(update) = self.inbox.take_update() {
            if let Some(active) = self.active.as_mut() {
                active.payload = update;
            }
        }
    }

    async fn step_idle(&mut self) {
        self.apply_pending_update();
        if !self.inbox.has_activation() {
            self.inbox.notified().await;
            return;
        }
        // A scene that completed on its own (render returned null, or a
        // wants_loop=false scene finished) leaves `active` populated —
        // its cleanup has not run yet. Route through the same
        // cleanup-then-init sequence a mid-flight switch uses, rather
        // than overwriting `active` directly, so cleanup(S1) still
        // happens-before init(S2).
        self.status = if self.active.is_some() {
            Status::Stopping
        } else {
            Status::Starting
        };
    }

    async fn step_starting(&mut self) {
        let (switch, set_driver) = self.inbox.take_activation();

        if let Some(driver) = set_driver {
            match self.transports.get(&driver).cloned() {
                Some(transport) => {
                    self.device.set_transport(transport);
                    info!(device = %self.device.host, ?driver, "driver swapped");
                }
                None => warn!(
                    device = %self.device.host,
                    ?driver,
                    "no transport configured for requested driver, ignoring"
                ),
            }
        }

        let target = switch
            .map(|s| (s.scene_name, s.payload))
            .or_else(|| self.restart_target.take());

        let (scene_name, mut payload) = match target {
            Some(target) => target,
            None => {
                self.status = Status::Idle;
                return;
            }
        };

        if let Some(update) = self.inbox.take_update() {
            merge_payload(&mut payload, update);
        }

        let scene = match self.registry.resolve(
            &scene_name,
            self.device.geometry.width,
            self.device.geometry.height,
        ) {
            Ok(scene) => scene,
            Err(err) => {
                error!(device = %self.device.host, scene = %scene_name, error = %err, "switch rejected");
                self.status = Status::Idle;
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let mut state = scene.new_state();

        let init_result = {
            let env = self.env();
            let surface = DrawSurface::new(&mut self.device, scene_name.clone(), generation);
            let mut ctx = SceneContext::new(surface, payload.clone(), false, env, &mut state);
            scene.init(&mut ctx).await
        };

        if let Err(err) = init_result {
            error!(
                device = %self.device.host, scene = %scene_name, generation,
                error = %err, "scene init failed"
            );
            self.status = Status::Idle;
            return;
        }

        self.active = Some(ActiveScene {
            scene: Arc::clone(&scene),
            state,
            payload,
        });

        // A newer switch that arrived while we were awaiting init
        // supersedes this one before it ever renders.
        if self.inbox.has_activation() {
            self.status = Status::Stopping;
            return;
        }

        if !scene.wants_loop() {
            self.render_once(false, generation).await;
            self.status = Status::Idle;
            return;
        }

        match self.render_once(false, generation).await {
            Some(deadline) => {
                self.next_tick = Some(deadline);
                self.status = Status::Running;
            }
            None => self.status = Status::Idle,
        }
    }

    async fn step_running(&mut self) {
        self.apply_pending_update();
        if self.inbox.has_activation() {
            self.status = Status::Stopping;
            return;
        }

        let deadline = self.next_tick.unwrap_or_else(Instant::now);
        tokio::select! {
            () = tokio::time::sleep_until(deadline.into()) => {
                let generation = self.generation;
                match self.render_once(true, generation).await {
                    Some(next) => self.next_tick = Some(next),
                    None => self.status = Status::Idle,
                }
            }
            () = self.inbox.notified() => {
                // Loop back to the top, where the activation (or update)
                // just delivered gets applied.
            }
        }
    }

    async fn step_stopping(&mut self) {
        if let Some(mut active) = self.active.take() {
            self.restart_target = Some((active.scene.name().to_string(), active.payload.clone()));

            let generation = self.generation;
            let env = self.env();
            let surface = DrawSurface::new(&mut self.device, active.scene.name().to_string(), generation);
            let mut ctx = SceneContext::new(
                surface,
                active.payload.clone(),
                false,
                env,
                &mut active.state,
            );
            if let Err(err) = active.scene.cleanup(&mut ctx).await {
                error!(
                    device = %self.device.host, scene = active.scene.name(), generation,
                    error = %err, "scene cleanup failed"
                );
            }
        }
        self.next_tick = None;
        self.status = Status::Starting;
    }

    /// Render once, update shared metrics from whatever the push inside
    /// render observed, and translate the scene's return value into a
    /// ticker deadline (fixed-cadence, measured from render's start) or
    /// `None` for "stop ticking."
    async fn render_once(&mut self, loop_driven: bool, generation: u64) -> Option<Instant> {
        let env = self.env();
        let active = self
            .active
            .as_mut()
            .expect("render_once called without an active scene");
        let scene = Arc::clone(&active.scene);
        let payload = active.payload.clone();
        let started = Instant::now();

        let result = {
            let surface = DrawSurface::new(&mut self.device, scene.name().to_string(), generation);
            let mut ctx = SceneContext::new(surface, payload, loop_driven, env, &mut active.state);
            scene.render(&mut ctx).await
        };

        *self.shared_metrics.lock().unwrap() = self.device.metrics.clone();

        // This can never actually fire in the current single-task-per-device
        // model: nothing else can bump `self.generation` while this future
        // is being awaited. It documents the invariant the spec calls out
        // rather than guarding against a reachable race.
        debug_assert_eq!(generation, self.generation);

        match result {
            Ok(Some(delay_ms)) => {
                let deadline = started + Duration::from_millis(delay_ms);
                Some(deadline.max(Instant::now()))
            }
            Ok(None) => None,
            Err(err) => {
                error!(
                    device = %self.device.host, scene = scene.name(), generation,
                    error = %err, "scene render failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetricsSink;
    use crate::scene::SceneContext as Ctx;
    use crate::transport::MockTransport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration as StdDuration;

    fn transports(mock: Arc<MockTransport>) -> HashMap<DriverKind, Arc<dyn Transport>> {
        let mut map: HashMap<DriverKind, Arc<dyn Transport>> = HashMap::new();
        map.insert(DriverKind::Mock, mock);
        map
    }

    struct CountingLoop {
        count: Arc<AtomicU64>,
        delay_ms: u64,
    }

    #[async_trait]
    impl Scene for CountingLoop {
        fn name(&self) -> &str {
            "counting-loop"
        }
        fn new_state(&self) -> Box<dyn Any + Send> {
            Box::new(())
        }
        async fn render(&self, ctx: &mut Ctx<'_>) -> anyhow::Result<Option<u64>> {
            self.count.fetch_add(1, Ordering::SeqCst);
            ctx.device.draw_pixel(
                0,
                0,
                crate::framebuffer::Rgba::opaque(
                    (self.count.load(Ordering::SeqCst) % 255) as u8,
                    0,
                    0,
                ),
            );
            ctx.device.push(false).await?;
            Ok(Some(self.delay_ms))
        }
    }

    struct OneShot;

    #[async_trait]
    impl Scene for OneShot {
        fn name(&self) -> &str {
            "one-shot"
        }
        fn new_state(&self) -> Box<dyn Any + Send> {
            Box::new(())
        }
        async fn render(&self, ctx: &mut Ctx<'_>) -> anyhow::Result<Option<u64>> {
            ctx.device
                .draw_pixel(0, 0, crate::framebuffer::Rgba::opaque(9, 9, 9));
            ctx.device.push(false).await?;
            Ok(None)
        }
    }

    fn geometry() -> Geometry {
        Geometry {
            width: 4,
            height: 4,
        }
    }

    #[tokio::test]
    async fn adaptive_loop_keeps_pushing_until_switched_away() {
        let mock = Arc::new(MockTransport::new(4, 4, StdDuration::from_millis(5)));
        let mut registry = SceneRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        registry
            .register(Arc::new(CountingLoop {
                count: Arc::clone(&count),
                delay_ms: 0,
            }))
            .unwrap();

        let handle = spawn(
            "dev",
            geometry(),
            Arc::new(registry),
            transports(Arc::clone(&mock)),
            DriverKind::Mock,
            Arc::new(NullMetricsSink),
        );

        handle.switch_scene("counting-loop", empty_payload());
        tokio::time::sleep(StdDuration::from_millis(120)).await;

        assert!(mock.push_count() >= 5, "expected several adaptive pushes, got {}", mock.push_count());
    }

    #[tokio::test]
    async fn completion_terminates_the_loop_and_update_does_not_retrigger() {
        let mock = Arc::new(MockTransport::new(4, 4, StdDuration::from_millis(1)));
        let mut registry = SceneRegistry::new();
        registry.register(Arc::new(OneShot)).unwrap();

        let handle = spawn(
            "dev",
            geometry(),
            Arc::new(registry),
            transports(Arc::clone(&mock)),
            DriverKind::Mock,
            Arc::new(NullMetricsSink),
        );

        handle.switch_scene("one-shot", empty_payload());
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(mock.push_count(), 1);

        handle.update_state(serde_json::json!({"x": 1}));
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(mock.push_count(), 1, "update_state must not retrigger render");

        handle.switch_scene("one-shot", empty_payload());
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(mock.push_count(), 2, "a fresh SwitchScene must retrigger");
    }

    #[tokio::test]
    async fn mid_frame_switch_lets_outgoing_scene_finish_then_runs_incoming_once() {
        let mock = Arc::new(MockTransport::new(4, 4, StdDuration::from_millis(1)));
        let mut registry = SceneRegistry::new();

        struct SlowThenAdaptive {
            started: Arc<AtomicU64>,
        }
        #[async_trait]
        impl Scene for SlowThenAdaptive {
            fn name(&self) -> &str {
                "slow-a"
            }
            fn new_state(&self) -> Box<dyn Any + Send> {
                Box::new(())
            }
            async fn render(&self, ctx: &mut Ctx<'_>) -> anyhow::Result<Option<u64>> {
                self.started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(StdDuration::from_millis(80)).await;
                ctx.device
                    .draw_pixel(0, 0, crate::framebuffer::Rgba::opaque(1, 1, 1));
                ctx.device.push(false).await?;
                Ok(Some(0))
            }
        }

        let a_starts = Arc::new(AtomicU64::new(0));
        registry
            .register(Arc::new(SlowThenAdaptive {
                started: Arc::clone(&a_starts),
            }))
            .unwrap();
        registry.register(Arc::new(OneShot)).unwrap();

        let handle = spawn(
            "dev",
            geometry(),
            Arc::new(registry),
            transports(Arc::clone(&mock)),
            DriverKind::Mock,
            Arc::new(NullMetricsSink),
        );

        handle.switch_scene("slow-a", empty_payload());
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        handle.switch_scene("one-shot", empty_payload());

        tokio::time::sleep(StdDuration::from_millis(250)).await;

        assert_eq!(a_starts.load(Ordering::SeqCst), 1, "A must render exactly once");
        assert_eq!(mock.push_count(), 2, "exactly one A push then one B push");
    }

    #[tokio::test]
    async fn fixed_cadence_schedules_from_render_start_not_render_end() {
        let mock = Arc::new(MockTransport::new(4, 4, StdDuration::from_millis(20)));
        let mut registry = SceneRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        registry
            .register(Arc::new(CountingLoop {
                count: Arc::clone(&count),
                delay_ms: 100,
            }))
            .unwrap();

        let handle = spawn(
            "dev",
            geometry(),
            Arc::new(registry),
            transports(Arc::clone(&mock)),
            DriverKind::Mock,
            Arc::new(NullMetricsSink),
        );

        handle.switch_scene("counting-loop", empty_payload());
        tokio::time::sleep(StdDuration::from_millis(520)).await;

        let pushes = mock.push_count();
        assert!(
            (4..=7).contains(&pushes),
            "expected ~5 pushes at a 100ms cadence over 520ms, got {pushes}"
        );
    }
}
