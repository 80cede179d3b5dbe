//! Engine orchestration: frame source, capture loop and handle.
//!
//! `Engine::start` wires the collaborators together and moves the
//! capture loop onto a blocking worker thread; the returned
//! `EngineHandle` is the only surface the embedding application needs:
//! a command sender, a stop switch, a stats snapshot and `join`.
//!
//! The loop itself is single-threaded and synchronous. Per iteration it
//! drains pending commands, pulls one frame, runs motion detection,
//! applies overlays and feeds the event controller. Chat delivery runs
//! on its own worker so a slow transport can never stall capture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::command::{command_channel, Command, CommandReceiver, CommandSender};
use crate::config::{ConfigStore, WatchConfig};
use crate::error::CaptureError;
use crate::event::EventController;
use crate::frame::{self, Frame};
use crate::media::{MediaKind, MediaWriter};
use crate::motion::MotionDetector;
use crate::notify::{spawn_dispatcher, Notification, Notifier, NotifyQueue};

const COMMAND_QUEUE_CAPACITY: usize = 32;
const NOTIFY_QUEUE_CAPACITY: usize = 64;

/// Fixed properties reported by a frame source at startup.
#[derive(Debug, Clone, Copy)]
pub struct SourceProperties {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Camera boundary. `next_frame` blocks until a frame is available and
/// is expected to pace the loop at the device frame rate.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
    fn properties(&self) -> SourceProperties;
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    events_opened: AtomicU64,
    commands_applied: AtomicU64,
    detector_resets: AtomicU64,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub frames: u64,
    pub events_opened: u64,
    pub commands_applied: u64,
    pub detector_resets: u64,
    pub notifications_dropped: u64,
}

pub struct Engine {
    source: Box<dyn FrameSource>,
    writer: Box<dyn MediaWriter>,
    notifier: Box<dyn Notifier>,
    store: ConfigStore,
}

impl Engine {
    pub fn new(
        source: Box<dyn FrameSource>,
        writer: Box<dyn MediaWriter>,
        notifier: Box<dyn Notifier>,
        store: ConfigStore,
    ) -> Self {
        Self {
            source,
            writer,
            notifier,
            store,
        }
    }

    /// Spawns the capture loop and the notification dispatcher. Requires
    /// a running tokio runtime.
    pub fn start(self) -> EngineHandle {
        let Engine {
            source,
            writer,
            notifier,
            store,
        } = self;

        let store = Arc::new(store);
        let counters = Arc::new(Counters::default());
        let (commands, cmd_rx) = command_channel(COMMAND_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let queue = NotifyQueue::new(NOTIFY_QUEUE_CAPACITY);
        let dropped = queue.dropped_counter();
        let dispatcher = spawn_dispatcher(notifier, queue.receiver());

        let props = source.properties();
        let cfg = store.snapshot();
        info!(
            "Starting surveillance engine: {}x{} @ {:.1} fps, sensitivity {}",
            props.width, props.height, props.fps, cfg.sensitivity
        );

        let detector = MotionDetector::new(cfg.sensitivity);
        let controller = EventController::new(writer, props.fps);

        let loop_store = store.clone();
        let loop_counters = counters.clone();
        let capture = tokio::task::spawn_blocking(move || {
            run_loop(
                source,
                detector,
                controller,
                loop_store,
                cmd_rx,
                queue,
                stop_rx,
                loop_counters,
            )
        });

        EngineHandle {
            commands,
            stop_tx,
            capture,
            dispatcher,
            counters,
            dropped,
            store,
        }
    }
}

/// Handle to a running engine.
pub struct EngineHandle {
    commands: CommandSender,
    stop_tx: watch::Sender<bool>,
    capture: tokio::task::JoinHandle<anyhow::Result<()>>,
    dispatcher: tokio::task::JoinHandle<u64>,
    counters: Arc<Counters>,
    dropped: Arc<AtomicU64>,
    store: Arc<ConfigStore>,
}

impl EngineHandle {
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn config(&self) -> Arc<WatchConfig> {
        self.store.snapshot()
    }

    /// Requests a stop; the loop notices at its next iteration.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            events_opened: self.counters.events_opened.load(Ordering::Relaxed),
            commands_applied: self.counters.commands_applied.load(Ordering::Relaxed),
            detector_resets: self.counters.detector_resets.load(Ordering::Relaxed),
            notifications_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Waits for the capture loop to exit, then for the dispatcher to
    /// drain the remaining notifications.
    pub async fn join(self) -> anyhow::Result<()> {
        let result = self.capture.await?;
        drop(self.commands);
        let undelivered = self.dispatcher.await?;
        if undelivered > 0 {
            warn!("{} notifications were abandoned after retry", undelivered);
        }
        result
    }
}

enum Flow {
    Continue,
    Shutdown,
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    mut source: Box<dyn FrameSource>,
    mut detector: MotionDetector,
    mut controller: EventController,
    store: Arc<ConfigStore>,
    commands: CommandReceiver,
    queue: NotifyQueue,
    stop_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) -> anyhow::Result<()> {
    info!("Surveillance engine running");
    let mut pending_captures: Vec<MediaKind> = Vec::new();

    loop {
        if *stop_rx.borrow() {
            shutdown(&mut controller, &store, &queue);
            return Ok(());
        }

        while let Ok(command) = commands.try_recv() {
            counters.commands_applied.fetch_add(1, Ordering::Relaxed);
            match apply_command(command, &store, &mut controller, &mut pending_captures, &queue) {
                Flow::Continue => {}
                Flow::Shutdown => {
                    shutdown(&mut controller, &store, &queue);
                    return Ok(());
                }
            }
        }

        let mut frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Frame capture failed: {}", e);
                controller.force_finalize(&queue);
                queue.push(Notification::Text(format!(
                    "Camera failure, surveillance stopped: {}",
                    e
                )));
                if let Err(pe) = store.persist() {
                    warn!("{}", pe);
                }
                return Err(e.into());
            }
        };
        counters.frames.fetch_add(1, Ordering::Relaxed);

        let cfg = store.snapshot();
        detector.set_sensitivity(cfg.sensitivity);
        let sample = detector.observe(&frame);
        counters
            .detector_resets
            .store(detector.resets(), Ordering::Relaxed);

        // Overlays go on after detection so they never feed back into
        // the reference grid.
        if cfg.timestamp_overlay {
            frame::stamp_timestamp(&mut frame);
        }
        if cfg.draw_motion_contours {
            if let Some(region) = &sample.region {
                frame::draw_rect(&mut frame.image, region);
            }
        }

        for kind in pending_captures.drain(..) {
            controller.capture_now(kind, &frame, &cfg, &queue);
        }
        controller.on_frame(&frame, &sample, &cfg, &queue);
        counters
            .events_opened
            .store(controller.events_opened(), Ordering::Relaxed);
    }
}

fn apply_command(
    command: Command,
    store: &ConfigStore,
    controller: &mut EventController,
    pending_captures: &mut Vec<MediaKind>,
    queue: &NotifyQueue,
) -> Flow {
    match command {
        Command::SetSensitivity(value) => {
            let value = value.min(100);
            store.update(|c| c.sensitivity = value);
            info!("Sensitivity set to {}", value);
        }
        Command::SetEnabled(enabled) => {
            store.update(|c| c.surveillance_enabled = enabled);
            if !enabled {
                // Disabling mid-event finalizes it immediately.
                controller.force_finalize(queue);
            }
            info!(
                "Surveillance {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        // Executed against the next captured frame.
        Command::CaptureNow(kind) => pending_captures.push(kind),
        Command::SetTimestampOverlay(on) => {
            store.update(|c| c.timestamp_overlay = on);
        }
        Command::SetMotionContours(on) => {
            store.update(|c| c.draw_motion_contours = on);
        }
        Command::SetPictureInterval(seconds) => {
            let seconds = seconds.clamp(1, 99);
            store.update(|c| c.picture_interval_seconds = seconds);
        }
        Command::SetManualVideoSeconds(seconds) => {
            let seconds = seconds.clamp(1, 99);
            store.update(|c| c.manual_video_seconds = seconds);
        }
        Command::SetCooldown(seconds) => {
            let seconds = seconds.clamp(1, 99);
            store.update(|c| c.cooldown_seconds = seconds);
        }
        Command::SetMaxEventSeconds(seconds) => {
            let seconds = seconds.clamp(1, 99);
            store.update(|c| c.max_event_seconds = seconds);
        }
        Command::Shutdown => return Flow::Shutdown,
    }
    Flow::Continue
}

fn shutdown(controller: &mut EventController, store: &ConfigStore, queue: &NotifyQueue) {
    info!("Shutdown requested, finalizing");
    controller.force_finalize(queue);
    if let Err(e) = store.persist() {
        warn!("{}", e);
    }
    info!("Surveillance engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoCodec;
    use crate::error::{DeliveryError, WriteError};
    use crate::media::VideoSink;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use image::{Rgb, RgbImage};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    // ── Fakes ───────────────────────────────────────────────────────────

    /// Generates frames on demand at a synthetic 30 fps timeline with a
    /// short real sleep so the loop yields to other tasks.
    struct ScriptedSource {
        base: DateTime<Utc>,
        count: u64,
        limit: Option<u64>,
        pattern: Box<dyn Fn(u64) -> RgbImage + Send>,
    }

    impl ScriptedSource {
        fn flat() -> Self {
            Self::with_pattern(|_| RgbImage::from_pixel(64, 48, Rgb([40, 40, 40])))
        }

        fn with_pattern(pattern: impl Fn(u64) -> RgbImage + Send + 'static) -> Self {
            Self {
                base: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
                count: 0,
                limit: None,
                pattern: Box::new(pattern),
            }
        }

        fn limited(mut self, frames: u64) -> Self {
            self.limit = Some(frames);
            self
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            if let Some(limit) = self.limit {
                if self.count >= limit {
                    return Err(CaptureError::Disconnected);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
            let at = self.base + ChronoDuration::milliseconds(self.count as i64 * 33);
            let image = (self.pattern)(self.count);
            self.count += 1;
            Ok(Frame::new(at, image))
        }

        fn properties(&self) -> SourceProperties {
            SourceProperties {
                width: 64,
                height: 48,
                fps: 30.0,
            }
        }
    }

    struct NullSink(PathBuf);

    impl VideoSink for NullSink {
        fn append(&mut self, _frame: &Frame) -> Result<(), WriteError> {
            Ok(())
        }
        fn finish(self: Box<Self>) -> Result<PathBuf, WriteError> {
            Ok(self.0)
        }
    }

    #[derive(Clone, Default)]
    struct NullWriter {
        photos: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl MediaWriter for NullWriter {
        fn start_video(
            &mut self,
            path: &Path,
            _fps: f64,
            _codec: VideoCodec,
        ) -> Result<Box<dyn VideoSink>, WriteError> {
            Ok(Box::new(NullSink(path.to_path_buf())))
        }

        fn capture_photo(&mut self, _frame: &Frame, path: &Path) -> Result<PathBuf, WriteError> {
            self.photos.lock().unwrap().push(path.to_path_buf());
            Ok(path.to_path_buf())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Notifier for RecordingNotifier {
        fn send_photo(&self, _path: &PathBuf, caption: &str) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(format!("photo:{}", caption));
            Ok(())
        }
        fn send_video(&self, _path: &PathBuf, caption: &str) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(format!("video:{}", caption));
            Ok(())
        }
        fn send_text(&self, message: &str) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(format!("text:{}", message));
            Ok(())
        }
    }

    fn engine_with(source: ScriptedSource, notifier: RecordingNotifier, cfg: WatchConfig) -> Engine {
        Engine::new(
            Box::new(source),
            Box::new(NullWriter::default()),
            Box::new(notifier),
            ConfigStore::new(cfg),
        )
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_now_photo_works_while_disabled() {
        let notifier = RecordingNotifier::default();
        let sent = notifier.sent.clone();
        let writer = NullWriter::default();
        let photos = writer.photos.clone();

        let engine = Engine::new(
            Box::new(ScriptedSource::flat()),
            Box::new(writer),
            Box::new(notifier),
            ConfigStore::new(WatchConfig {
                surveillance_enabled: false,
                ..WatchConfig::default()
            }),
        );
        let handle = engine.start();
        let commands = handle.commands();

        commands.send(Command::CaptureNow(MediaKind::Photo)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        commands.send(Command::Shutdown).unwrap();

        let stats = handle.stats();
        handle.join().await.unwrap();

        assert!(stats.frames > 0);
        assert_eq!(photos.lock().unwrap().len(), 1);
        let sent = sent.lock().unwrap();
        assert_eq!(
            sent.iter().filter(|s| s.starts_with("photo:")).count(),
            1,
            "notifications: {:?}",
            *sent
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn motion_opens_and_closes_events_end_to_end() {
        // Alternating flat and bright-square frames keep the block diff
        // high on every frame, so motion is continuous on the synthetic
        // 30 fps timeline and events are bounded by max_event_seconds.
        let source = ScriptedSource::with_pattern(|n| {
            let mut img = RgbImage::from_pixel(64, 48, Rgb([40, 40, 40]));
            if n % 2 == 1 {
                for y in 8..40 {
                    for x in 16..48 {
                        img.put_pixel(x, y, Rgb([250, 250, 250]));
                    }
                }
            }
            img
        });
        let notifier = RecordingNotifier::default();
        let sent = notifier.sent.clone();

        let engine = engine_with(
            source,
            notifier,
            WatchConfig {
                surveillance_enabled: true,
                sensitivity: 80,
                grace_seconds: 1,
                max_event_seconds: 2,
                cooldown_seconds: 1,
                picture_interval_seconds: 1,
                ..WatchConfig::default()
            },
        );
        let handle = engine.start();

        // ~300 real ms is ~10 synthetic seconds of frames.
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop();
        let stats = handle.stats();
        handle.join().await.unwrap();

        assert!(stats.events_opened >= 1, "stats: {:?}", stats);
        let sent = sent.lock().unwrap();
        assert!(
            sent.iter().any(|s| s.starts_with("video:")),
            "notifications: {:?}",
            *sent
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sensitivity_command_updates_config() {
        let engine = engine_with(
            ScriptedSource::flat(),
            RecordingNotifier::default(),
            WatchConfig::default(),
        );
        let handle = engine.start();
        let commands = handle.commands();

        commands.send(Command::SetSensitivity(200)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Clamped to the valid range before it reaches the detector.
        assert_eq!(handle.config().sensitivity, 100);
        assert!(handle.stats().commands_applied >= 1);

        commands.send(Command::Shutdown).unwrap();
        handle.join().await.unwrap();
    }

    #[test]
    fn capture_failure_stops_loop_with_error() {
        let source = ScriptedSource::flat().limited(3);
        let store = Arc::new(ConfigStore::new(WatchConfig::default()));
        let detector = MotionDetector::new(50);
        let controller = EventController::new(Box::new(NullWriter::default()), 30.0);
        let (_cmd_tx, cmd_rx) = command_channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let queue = NotifyQueue::new(16);
        let rx = queue.receiver();
        let counters = Arc::new(Counters::default());

        let result = run_loop(
            Box::new(source),
            detector,
            controller,
            store,
            cmd_rx,
            queue,
            stop_rx,
            counters.clone(),
        );

        assert!(result.is_err());
        assert_eq!(counters.frames.load(Ordering::Relaxed), 3);
        let notes: Vec<_> = rx.try_iter().collect();
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::Text(t) if t.contains("Camera failure"))));
    }
}
