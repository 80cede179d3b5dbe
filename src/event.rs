//! Surveillance event lifecycle.
//!
//! `EventController` consumes the per-frame motion verdict and decides
//! when an event opens, extends and closes, driving the media writer
//! while the event is active and handing finished artifacts to the
//! notification queue. It is the only place an event is created or
//! destroyed, which is what enforces the one-open-event invariant.
//!
//! All deadlines (grace gap, max duration, cooldown) are compared against
//! frame timestamps, never wall-clock timers, so behavior stays
//! deterministic when the camera stalls. The grace window is measured
//! from the last motion; the cooldown deadline starts when the event is
//! finalized.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WatchConfig;
use crate::error::WriteError;
use crate::frame::Frame;
use crate::media::{self, MediaKind, MediaWriter, VideoSink};
use crate::motion::MotionSample;
use crate::notify::{Notification, NotifyQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Idle,
    Active,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTrigger {
    Motion,
    Manual,
}

impl EventTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            EventTrigger::Motion => "on_motion",
            EventTrigger::Manual => "on_demand",
        }
    }
}

/// One continuous recording session, open to close.
#[derive(Debug, Clone)]
pub struct SurveillanceEvent {
    pub id: Uuid,
    pub trigger: EventTrigger,
    pub kind: MediaKind,
    pub started_at: DateTime<Utc>,
    pub last_motion_at: DateTime<Utc>,
    pub frames_written: u64,
    pub photos_sent: u64,
}

/// Idle / Active / Cooldown state machine driving media capture.
pub struct EventController {
    writer: Box<dyn MediaWriter>,
    fps: f64,
    state: EventState,
    event: Option<SurveillanceEvent>,
    sink: Option<Box<dyn VideoSink>>,
    cooldown_until: Option<DateTime<Utc>>,
    events_opened: u64,
}

impl EventController {
    pub fn new(writer: Box<dyn MediaWriter>, fps: f64) -> Self {
        Self {
            writer,
            fps,
            state: EventState::Idle,
            event: None,
            sink: None,
            cooldown_until: None,
            events_opened: 0,
        }
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn events_opened(&self) -> u64 {
        self.events_opened
    }

    /// Feeds one frame plus its motion verdict through the state machine.
    pub fn on_frame(
        &mut self,
        frame: &Frame,
        sample: &MotionSample,
        cfg: &WatchConfig,
        queue: &NotifyQueue,
    ) {
        let now = sample.timestamp;
        match self.state {
            EventState::Idle => {
                if sample.motion && cfg.surveillance_enabled {
                    self.open(EventTrigger::Motion, frame, cfg, queue, now);
                }
            }
            EventState::Active => self.drive_active(frame, sample, cfg, queue),
            EventState::Cooldown => {
                // Motion during cooldown still updates the detector
                // reference upstream but must not open a new event.
                match self.cooldown_until {
                    Some(until) if now >= until => {
                        debug!("Cooldown elapsed, ready for new events");
                        self.state = EventState::Idle;
                        self.cooldown_until = None;
                    }
                    Some(_) => {}
                    None => self.state = EventState::Idle,
                }
            }
        }
    }

    /// Manual capture. A photo is a one-shot side path that never touches
    /// the state machine, so it works in any state and with surveillance
    /// disabled. A video force-opens a manual event unless one is already
    /// recording.
    pub fn capture_now(
        &mut self,
        kind: MediaKind,
        frame: &Frame,
        cfg: &WatchConfig,
        queue: &NotifyQueue,
    ) {
        match kind {
            MediaKind::Photo => {
                let path =
                    media::artifact_path(&cfg.media_dir, "on_demand", frame.timestamp, "jpg");
                match self.writer.capture_photo(frame, &path) {
                    Ok(artifact) => queue.push(Notification::Photo {
                        path: artifact,
                        caption: "Photo on demand".into(),
                    }),
                    Err(e) => {
                        warn!("On-demand photo failed: {}", e);
                        queue.push(Notification::Text(format!("Photo capture failed: {}", e)));
                    }
                }
            }
            MediaKind::Video => {
                if self.state == EventState::Active {
                    queue.push(Notification::Text(
                        "A recording is already in progress".into(),
                    ));
                    return;
                }
                self.open(EventTrigger::Manual, frame, cfg, queue, frame.timestamp);
            }
        }
    }

    /// Forced finalization: closes any open event and returns to Idle.
    /// Used for shutdown and for disabling surveillance mid-event.
    pub fn force_finalize(&mut self, queue: &NotifyQueue) {
        if let Some(event) = self.event.take() {
            info!("Force-finalizing open event {}", event.id);
            self.close_sink(&event, queue);
        }
        self.state = EventState::Idle;
        self.cooldown_until = None;
    }

    fn drive_active(
        &mut self,
        frame: &Frame,
        sample: &MotionSample,
        cfg: &WatchConfig,
        queue: &NotifyQueue,
    ) {
        let now = sample.timestamp;
        let Some((trigger, started_at)) =
            self.event.as_ref().map(|e| (e.trigger, e.started_at))
        else {
            self.state = EventState::Idle;
            return;
        };

        if sample.motion {
            if let Some(event) = self.event.as_mut() {
                event.last_motion_at = now;
            }
        }

        let appended = match self.sink.as_mut() {
            Some(sink) => sink.append(frame),
            None => Ok(()),
        };
        if let Err(e) = appended {
            self.fail_event(e, now, cfg, queue);
            return;
        }
        if let Some(event) = self.event.as_mut() {
            event.frames_written += 1;
        }

        self.maybe_progress_photo(frame, cfg, queue, now);

        let elapsed = now - started_at;
        let deadline_hit = match trigger {
            EventTrigger::Manual => elapsed >= cfg.manual_video(),
            EventTrigger::Motion => elapsed >= cfg.max_event(),
        };
        let gap_elapsed = trigger == EventTrigger::Motion
            && self
                .event
                .as_ref()
                .map(|e| now - e.last_motion_at > cfg.grace())
                .unwrap_or(false);

        if deadline_hit || gap_elapsed {
            self.finalize(now, cfg, queue);
        }
    }

    fn open(
        &mut self,
        trigger: EventTrigger,
        frame: &Frame,
        cfg: &WatchConfig,
        queue: &NotifyQueue,
        now: DateTime<Utc>,
    ) {
        let path = media::artifact_path(&cfg.media_dir, trigger.label(), now, "mp4");
        let mut sink = match self.writer.start_video(&path, self.fps, cfg.video_codec) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Could not start video capture: {}", e);
                queue.push(Notification::Text(format!("Capture failed: {}", e)));
                self.enter_cooldown(now, cfg);
                return;
            }
        };
        if let Err(e) = sink.append(frame) {
            warn!("First video write failed: {}", e);
            let _ = sink.finish();
            queue.push(Notification::Text(format!("Recording failed: {}", e)));
            self.enter_cooldown(now, cfg);
            return;
        }

        let event = SurveillanceEvent {
            id: Uuid::new_v4(),
            trigger,
            kind: MediaKind::Video,
            started_at: now,
            last_motion_at: now,
            frames_written: 1,
            photos_sent: 0,
        };
        info!("Surveillance event {} opened ({})", event.id, trigger.label());
        queue.push(Notification::Text(match trigger {
            EventTrigger::Motion => "Motion detected! Recording video...".into(),
            EventTrigger::Manual => "Recording on-demand video...".into(),
        }));

        self.event = Some(event);
        self.sink = Some(sink);
        self.state = EventState::Active;
        self.cooldown_until = None;
        self.events_opened += 1;
    }

    /// Progress photos while a motion-triggered video records, one every
    /// `picture_interval_seconds` with an n/total caption.
    fn maybe_progress_photo(
        &mut self,
        frame: &Frame,
        cfg: &WatchConfig,
        queue: &NotifyQueue,
        now: DateTime<Utc>,
    ) {
        let interval = cfg.picture_interval_seconds;
        if interval == 0 {
            return;
        }
        let Some((trigger, started_at, photos_sent)) = self
            .event
            .as_ref()
            .map(|e| (e.trigger, e.started_at, e.photos_sent))
        else {
            return;
        };
        if trigger != EventTrigger::Motion {
            return;
        }

        let total = cfg.max_event_seconds / interval;
        let elapsed = (now - started_at).num_seconds().max(0) as u64;
        let due = elapsed / interval;
        if due <= photos_sent || photos_sent >= total {
            return;
        }

        let seq = photos_sent + 1;
        let path = media::artifact_path(&cfg.media_dir, "progress", now, "jpg");
        match self.writer.capture_photo(frame, &path) {
            Ok(artifact) => {
                queue.push(Notification::Photo {
                    path: artifact,
                    caption: format!("{}/{}", seq, total),
                });
                if let Some(event) = self.event.as_mut() {
                    event.photos_sent = seq;
                }
            }
            // Non-fatal, the recording itself is unaffected.
            Err(e) => warn!("Progress photo failed: {}", e),
        }
    }

    fn finalize(&mut self, now: DateTime<Utc>, cfg: &WatchConfig, queue: &NotifyQueue) {
        if let Some(event) = self.event.take() {
            self.close_sink(&event, queue);
        }
        self.enter_cooldown(now, cfg);
    }

    /// Media failure path: the event is finalized as failed, the operator
    /// gets a text notice instead of media, and the controller proceeds
    /// to Cooldown. The state machine must never stay stuck in Active.
    fn fail_event(
        &mut self,
        err: WriteError,
        now: DateTime<Utc>,
        cfg: &WatchConfig,
        queue: &NotifyQueue,
    ) {
        if let Some(event) = self.event.take() {
            warn!("Media write failed during event {}: {}", event.id, err);
        }
        if let Some(sink) = self.sink.take() {
            // Still release the file handle; the artifact is discarded.
            let _ = sink.finish();
        }
        queue.push(Notification::Text(format!("Recording failed: {}", err)));
        self.enter_cooldown(now, cfg);
    }

    fn close_sink(&mut self, event: &SurveillanceEvent, queue: &NotifyQueue) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        match sink.finish() {
            Ok(artifact) => {
                info!(
                    "Surveillance event {} closed, artifact {} ({} frames)",
                    event.id,
                    artifact.display(),
                    event.frames_written
                );
                queue.push(Notification::Video {
                    path: artifact,
                    caption: match event.trigger {
                        EventTrigger::Motion => "Motion event video".into(),
                        EventTrigger::Manual => "On-demand video".into(),
                    },
                });
            }
            Err(e) => {
                warn!("Finalize failed for event {}: {}", event.id, e);
                queue.push(Notification::Text(format!("Recording failed: {}", e)));
            }
        }
    }

    fn enter_cooldown(&mut self, now: DateTime<Utc>, cfg: &WatchConfig) {
        self.state = EventState::Cooldown;
        self.cooldown_until = Some(now + cfg.cooldown());
    }
}
