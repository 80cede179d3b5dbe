//! Typed operator commands.
//!
//! The chat-side command parser is an external collaborator; whatever its
//! grammar, it only ever emits this closed union into a bounded channel
//! that the capture loop drains between frames. Commands are therefore
//! never applied concurrently with a frame's processing.

use crate::media::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetSensitivity(u8),
    SetEnabled(bool),
    CaptureNow(MediaKind),
    SetTimestampOverlay(bool),
    SetMotionContours(bool),
    /// Seconds between progress photos during a motion video event.
    SetPictureInterval(u64),
    /// Duration of an on-demand video capture, in seconds.
    SetManualVideoSeconds(u64),
    SetCooldown(u64),
    SetMaxEventSeconds(u64),
    Shutdown,
}

pub type CommandSender = flume::Sender<Command>;
pub type CommandReceiver = flume::Receiver<Command>;

pub fn command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    flume::bounded(capacity)
}
