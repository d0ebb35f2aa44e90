//! Recorder notifications
//!
//! Lifecycle notifications are produced on the session pipeline and handed to
//! a dedicated callback thread, so delegate code never runs on the pipeline or
//! on a producer thread. The same events are broadcast to async subscribers.

use super::state::RecordingOutput;
use crate::clock::CanonicalTime;
use crate::utils::error::RecorderError;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Observer of a recorder's lifecycle
///
/// The recorder only keeps a weak reference. Possible orderings include
/// `prepared -> failed` (no start), `started -> failed` and
/// `will_stop -> failed` (no did-stop); `on_did_stop` is the only success
/// signal.
pub trait RecorderDelegate: Send + Sync {
    fn on_prepared(&self, _session_id: Uuid) {}

    fn on_started(&self, _start_time: CanonicalTime) {}

    fn on_failed(&self, error: &RecorderError);

    fn on_will_stop(&self) {}

    fn on_did_stop(&self, output: &RecordingOutput);
}

/// Events emitted by the recorder
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// Session allocated, `start_recording` may be called
    Prepared { session_id: Uuid },
    /// First buffer written
    Started { start_time: CanonicalTime },
    /// Session failed and was discarded
    Failed(Arc<RecorderError>),
    /// Finishing began, buffers are no longer accepted
    WillStop,
    /// Output finalized
    DidStop(RecordingOutput),
}

impl RecorderEvent {
    fn deliver(&self, delegate: &dyn RecorderDelegate) {
        match self {
            RecorderEvent::Prepared { session_id } => delegate.on_prepared(*session_id),
            RecorderEvent::Started { start_time } => delegate.on_started(*start_time),
            RecorderEvent::Failed(error) => delegate.on_failed(error),
            RecorderEvent::WillStop => delegate.on_will_stop(),
            RecorderEvent::DidStop(output) => delegate.on_did_stop(output),
        }
    }
}

/// Sending half owned by the session pipeline
pub(crate) struct Notifier {
    callbacks: mpsc::UnboundedSender<RecorderEvent>,
    events: broadcast::Sender<RecorderEvent>,
}

impl Notifier {
    /// Start the callback thread for `delegate`
    pub(crate) fn spawn(
        delegate: Option<Weak<dyn RecorderDelegate>>,
        events: broadcast::Sender<RecorderEvent>,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (callbacks, mut rx) = mpsc::unbounded_channel::<RecorderEvent>();

        let handle = std::thread::Builder::new()
            .name("recorder-callbacks".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) else {
                        tracing::trace!("No delegate for {:?}", event);
                        continue;
                    };
                    event.deliver(delegate.as_ref());
                }
                tracing::debug!("Recorder callback thread stopped");
            })?;

        Ok((Self { callbacks, events }, handle))
    }

    pub(crate) fn send(&self, event: RecorderEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event.clone());
        if self.callbacks.send(event).is_err() {
            tracing::warn!("Recorder callback thread is gone, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl RecorderDelegate for Collect {
        fn on_will_stop(&self) {
            self.0.lock().push("will_stop".to_string());
        }

        fn on_failed(&self, error: &RecorderError) {
            self.0.lock().push(format!("failed:{:?}", error.kind()));
        }

        fn on_did_stop(&self, _output: &RecordingOutput) {
            self.0.lock().push("did_stop".to_string());
        }
    }

    #[test]
    fn test_events_reach_delegate_in_order() {
        let delegate = Arc::new(Collect::default());
        let weak: Weak<dyn RecorderDelegate> = Arc::downgrade(&delegate) as Weak<dyn RecorderDelegate>;
        let (events, mut rx) = broadcast::channel(16);
        let (notifier, handle) = Notifier::spawn(Some(weak), events).unwrap();

        notifier.send(RecorderEvent::WillStop);
        notifier.send(RecorderEvent::Failed(Arc::new(RecorderError::EncoderFailure(
            "disk full".to_string(),
        ))));
        drop(notifier);
        handle.join().unwrap();

        assert_eq!(*delegate.0.lock(), vec!["will_stop", "failed:EncoderFailure"]);
        assert!(matches!(rx.try_recv().unwrap(), RecorderEvent::WillStop));
        assert!(matches!(rx.try_recv().unwrap(), RecorderEvent::Failed(_)));
    }

    #[test]
    fn test_dropped_delegate_is_tolerated() {
        let delegate = Arc::new(Collect::default());
        let weak: Weak<dyn RecorderDelegate> = Arc::downgrade(&delegate) as Weak<dyn RecorderDelegate>;
        drop(delegate);

        let (events, _) = broadcast::channel(4);
        let (notifier, handle) = Notifier::spawn(Some(weak), events).unwrap();
        notifier.send(RecorderEvent::WillStop);
        drop(notifier);
        handle.join().unwrap();
    }
}
