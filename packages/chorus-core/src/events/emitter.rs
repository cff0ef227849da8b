//! Event emitter abstraction for decoupling services from the analytics sink.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete sink,
//! enabling testing and alternative implementations.

use super::{PlaybackEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of where they end up.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.emitter.emit_playback(PlaybackEvent::VoiceJoined { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a guild playback event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a Connect session lifecycle event.
    fn emit_session(&self, event: SessionEvent);
}

/// No-op emitter for when usage events are not collected.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playback(&self, _event: PlaybackEvent) {
        // No-op
    }

    fn emit_session(&self, _event: SessionEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }
}
