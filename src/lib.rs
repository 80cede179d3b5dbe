//! camwatch: a motion-triggered camera surveillance engine.
//!
//! The engine pulls frames from a camera boundary, detects motion on a
//! downsampled block grid, and drives an Idle / Active / Cooldown event
//! state machine that records video artifacts and pushes media and
//! status notifications to a single operator, while a command channel
//! mutates the shared configuration at runtime.
//!
//! The camera, the media encoder and the chat transport are traits
//! (`FrameSource`, `MediaWriter`, `Notifier`) supplied by the embedding
//! application, so the engine itself stays free of device and network
//! dependencies and fully testable with fakes.
//!
//! ```no_run
//! use camwatch::{ConfigStore, Engine};
//!
//! # fn collaborators() -> (Box<dyn camwatch::FrameSource>, Box<dyn camwatch::MediaWriter>, Box<dyn camwatch::Notifier>) { unimplemented!() }
//! # async fn run() -> anyhow::Result<()> {
//! camwatch::init_logging();
//! let (source, writer, notifier) = collaborators();
//! let store = ConfigStore::load(Some("camwatch.json".into()));
//!
//! let handle = Engine::new(source, writer, notifier, store).start();
//! let commands = handle.commands();
//! commands.send(camwatch::Command::SetEnabled(true))?;
//! // ...
//! handle.stop();
//! handle.join().await
//! # }
//! ```

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod logging;
pub mod media;
pub mod motion;
pub mod notify;

pub use command::{command_channel, Command, CommandReceiver, CommandSender};
pub use config::{ConfigStore, VideoCodec, WatchConfig};
pub use engine::{Engine, EngineHandle, EngineStats, FrameSource, SourceProperties};
pub use error::{CaptureError, ConfigError, DeliveryError, WriteError};
pub use event::{EventController, EventState, EventTrigger, SurveillanceEvent};
pub use frame::{Frame, Rect};
pub use logging::init_logging;
pub use media::{MediaKind, MediaWriter, VideoSink};
pub use motion::{MotionDetector, MotionSample};
pub use notify::{spawn_dispatcher, Notification, Notifier, NotifyQueue};
