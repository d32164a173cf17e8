//! Media demultiplexer.
//!
//! Routes machine [`Event`]s to consumer callbacks. Each event kind has a
//! single slot; registering again replaces the previous callback, there is
//! no fan-out. A callback that panics is caught at this boundary, logged,
//! and counted. The dispatch loop and the session carry on.

use crate::errors::RtmsError;
use crate::session::{Participant, SessionInfo};
use crate::signaling::Event;
use rtms_protocol::{MediaFrame, MediaKind, SessionEvent, UserEvent};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};

pub type JoinConfirmCallback = Box<dyn FnMut(i32) + Send>;
pub type SessionUpdateCallback = Box<dyn FnMut(SessionEvent, &SessionInfo) + Send>;
pub type UserUpdateCallback = Box<dyn FnMut(UserEvent, &Participant) + Send>;
pub type MediaCallback = Box<dyn FnMut(&MediaFrame) + Send>;
pub type LeaveCallback = Box<dyn FnMut(i32) + Send>;

/// Per-kind delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStats {
    /// Frames handed to a callback
    pub frames: u64,
    /// Payload bytes handed to a callback
    pub bytes: u64,
    /// Frames with no callback registered
    pub unhandled: u64,
}

/// Callback slots plus dispatch bookkeeping.
#[derive(Default)]
pub struct Demultiplexer {
    join_confirm: Option<JoinConfirmCallback>,
    session_update: Option<SessionUpdateCallback>,
    user_update: Option<UserUpdateCallback>,
    audio: Option<MediaCallback>,
    video: Option<MediaCallback>,
    deskshare: Option<MediaCallback>,
    transcript: Option<MediaCallback>,
    chat: Option<MediaCallback>,
    leave: Option<LeaveCallback>,
    media_stats: HashMap<MediaKind, MediaStats>,
    callback_failures: u64,
}

impl Demultiplexer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_join_confirm(&mut self, callback: JoinConfirmCallback) {
        self.join_confirm = Some(callback);
    }

    pub fn set_session_update(&mut self, callback: SessionUpdateCallback) {
        self.session_update = Some(callback);
    }

    pub fn set_user_update(&mut self, callback: UserUpdateCallback) {
        self.user_update = Some(callback);
    }

    pub fn set_media(&mut self, kind: MediaKind, callback: MediaCallback) {
        *self.media_slot(kind) = Some(callback);
    }

    pub fn set_leave(&mut self, callback: LeaveCallback) {
        self.leave = Some(callback);
    }

    /// Delivery counters for `kind`.
    #[must_use]
    pub fn media_stats(&self, kind: MediaKind) -> MediaStats {
        self.media_stats.get(&kind).copied().unwrap_or_default()
    }

    /// Number of callback invocations that panicked.
    #[must_use]
    pub fn callback_failures(&self) -> u64 {
        self.callback_failures
    }

    /// Deliver one event to its slot.
    pub fn dispatch(&mut self, event: Event) {
        if let Some(mut callback) = self.checkout(&event) {
            let outcome = callback.call(&event);
            self.checkin(callback, &event, outcome);
        }
    }

    /// Take the callback for `event` out of its slot so it can run without
    /// the demultiplexer borrowed. `None` if nothing is registered.
    pub(crate) fn checkout(&mut self, event: &Event) -> Option<Checkout> {
        let checkout = match event {
            Event::JoinConfirm(_) => self.join_confirm.take().map(Checkout::JoinConfirm),
            Event::SessionUpdate { .. } => self.session_update.take().map(Checkout::SessionUpdate),
            Event::UserUpdate { .. } => self.user_update.take().map(Checkout::UserUpdate),
            Event::Leave(_) => self.leave.take().map(Checkout::Leave),
            Event::Media(frame) => self
                .media_slot(frame.kind)
                .take()
                .map(|callback| Checkout::Media(frame.kind, callback)),
        };

        if checkout.is_none() {
            if let Event::Media(frame) = event {
                self.media_stats.entry(frame.kind).or_default().unhandled += 1;
                trace!(target: "rtms.demux", kind = %frame.kind, "No callback registered for media");
            }
        }
        checkout
    }

    /// Return a callback after it ran and record the outcome.
    ///
    /// A callback registered while this one was out wins; the returned one
    /// is dropped.
    pub(crate) fn checkin(
        &mut self,
        callback: Checkout,
        event: &Event,
        outcome: Result<(), RtmsError>,
    ) {
        match callback {
            Checkout::JoinConfirm(cb) => restore(&mut self.join_confirm, cb),
            Checkout::SessionUpdate(cb) => restore(&mut self.session_update, cb),
            Checkout::UserUpdate(cb) => restore(&mut self.user_update, cb),
            Checkout::Media(kind, cb) => restore(self.media_slot(kind), cb),
            Checkout::Leave(cb) => restore(&mut self.leave, cb),
        }

        match outcome {
            Ok(()) => {
                if let Event::Media(frame) = event {
                    let stats = self.media_stats.entry(frame.kind).or_default();
                    stats.frames += 1;
                    stats.bytes += frame.size() as u64;
                }
            }
            Err(error) => {
                self.callback_failures += 1;
                warn!(target: "rtms.demux", error = %error, "Callback failed, continuing");
            }
        }
    }

    fn media_slot(&mut self, kind: MediaKind) -> &mut Option<MediaCallback> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
            MediaKind::Deskshare => &mut self.deskshare,
            MediaKind::Transcript => &mut self.transcript,
            MediaKind::Chat => &mut self.chat,
        }
    }
}

/// A callback taken out of its slot for one delivery.
pub(crate) enum Checkout {
    JoinConfirm(JoinConfirmCallback),
    SessionUpdate(SessionUpdateCallback),
    UserUpdate(UserUpdateCallback),
    Media(MediaKind, MediaCallback),
    Leave(LeaveCallback),
}

impl Checkout {
    /// Run the callback for `event`, catching panics.
    pub(crate) fn call(&mut self, event: &Event) -> Result<(), RtmsError> {
        match (self, event) {
            (Checkout::JoinConfirm(cb), Event::JoinConfirm(reason)) => {
                guarded("on_join_confirm", || cb(*reason))
            }
            (Checkout::SessionUpdate(cb), Event::SessionUpdate { op, session }) => {
                guarded("on_session_update", || cb(*op, session))
            }
            (Checkout::UserUpdate(cb), Event::UserUpdate { op, participant }) => {
                guarded("on_user_update", || cb(*op, participant))
            }
            (Checkout::Media(kind, cb), Event::Media(frame)) => {
                guarded(media_slot_name(*kind), || cb(frame))
            }
            (Checkout::Leave(cb), Event::Leave(reason)) => guarded("on_leave", || cb(*reason)),
            _ => Ok(()),
        }
    }
}

fn media_slot_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "on_audio_data",
        MediaKind::Video => "on_video_data",
        MediaKind::Deskshare => "on_deskshare_data",
        MediaKind::Transcript => "on_transcript_data",
        MediaKind::Chat => "on_chat_data",
    }
}

fn restore<F: ?Sized>(slot: &mut Option<Box<F>>, callback: Box<F>) {
    if slot.is_none() {
        *slot = Some(callback);
    }
}

/// Run `call`, turning a panic into `CallbackError`.
fn guarded(slot: &'static str, call: impl FnOnce()) -> Result<(), RtmsError> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| RtmsError::CallbackError {
        slot,
        message: payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
    })
}
