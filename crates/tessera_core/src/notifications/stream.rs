//! Registration tokens and the bounded delivery channel.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tessera_engine::{Engine, ListenerId};
use tracing::{debug, warn};

struct TokenInner {
    engine: Weak<dyn Engine>,
    listener: OnceLock<ListenerId>,
    disposed: AtomicBool,
}

impl TokenInner {
    fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let (Some(listener), Some(engine)) = (self.listener.get(), self.engine.upgrade()) {
            engine.remove_listener(*listener);
            debug!(listener = listener.as_u64(), "removed listener");
        }
        true
    }
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Cancels one notification registration.
///
/// Disposing is the only way to stop deliveries. It releases the engine
/// registration exactly once, however many times it is called; dropping
/// the last clone disposes as well. A callback already in flight may still
/// complete after disposal.
#[derive(Clone)]
pub struct NotificationToken {
    inner: Arc<TokenInner>,
}

impl NotificationToken {
    pub(crate) fn new(engine: Weak<dyn Engine>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                engine,
                listener: OnceLock::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Attaches the engine registration. A token disposed before binding
    /// releases the registration right away.
    pub(crate) fn bind(&self, listener: ListenerId) {
        if self.inner.listener.set(listener).is_err() {
            return;
        }
        if self.inner.disposed.load(Ordering::SeqCst) {
            if let Some(engine) = self.inner.engine.upgrade() {
                engine.remove_listener(listener);
            }
        }
    }

    fn downgrade(&self) -> Weak<TokenInner> {
        Arc::downgrade(&self.inner)
    }

    /// Stops deliveries. Returns true only on the call that disposed.
    pub fn dispose(&self) -> bool {
        self.inner.dispose()
    }

    /// Returns true once disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationToken")
            .field("listener", &self.inner.listener.get())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Result of translating one raw batch.
pub(crate) enum Delivery<E> {
    /// Nothing observable changed.
    Skip,
    /// Deliver and keep listening.
    Event(E),
    /// Deliver, then close the stream.
    Last(E),
}

/// The sending half shared with the engine callback.
pub(crate) struct Sink<E> {
    sender: Mutex<Option<SyncSender<E>>>,
    reason: Arc<Mutex<Option<CoreError>>>,
    token: Weak<TokenInner>,
    capacity: usize,
}

impl<E> Sink<E> {
    /// Delivers the outcome of one translation.
    pub(crate) fn deliver(&self, outcome: CoreResult<Delivery<E>>) {
        let mut sender = self.sender.lock();
        let Some(channel) = sender.as_ref() else {
            return;
        };
        let (event, last) = match outcome {
            Ok(Delivery::Skip) => return,
            Ok(Delivery::Event(event)) => (event, false),
            Ok(Delivery::Last(event)) => (event, true),
            Err(error) => {
                warn!(%error, "closing notification stream");
                self.close(&mut sender, Some(error));
                return;
            }
        };
        match channel.try_send(event) {
            Ok(()) if last => self.close(&mut sender, None),
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, "notification consumer fell behind; closing stream");
                self.close(
                    &mut sender,
                    Some(CoreError::NotificationOverflow {
                        capacity: self.capacity,
                    }),
                );
            }
            Err(TrySendError::Disconnected(_)) => self.close(&mut sender, None),
        }
    }

    fn close(&self, sender: &mut Option<SyncSender<E>>, reason: Option<CoreError>) {
        if reason.is_some() {
            *self.reason.lock() = reason;
        }
        sender.take();
        if let Some(token) = self.token.upgrade() {
            token.dispose();
        }
    }
}

/// Creates a connected sink and stream.
pub(crate) fn channel<E>(
    token: NotificationToken,
    capacity: usize,
) -> (Sink<E>, ChangeStream<E>) {
    let (sender, receiver) = std::sync::mpsc::sync_channel(capacity);
    let reason = Arc::new(Mutex::new(None));
    let sink = Sink {
        sender: Mutex::new(Some(sender)),
        reason: Arc::clone(&reason),
        token: token.downgrade(),
        capacity,
    };
    let stream = ChangeStream {
        receiver,
        reason,
        token,
    };
    (sink, stream)
}

/// An ordered stream of change events for one registration.
///
/// Events are buffered up to the realm's `notification_buffer`. A consumer
/// that falls further behind gets the stream closed with
/// [`CoreError::NotificationOverflow`]. After the last event, receiving
/// returns the close reason once, if there is one, then `None`.
pub struct ChangeStream<E> {
    receiver: Receiver<E>,
    reason: Arc<Mutex<Option<CoreError>>>,
    token: NotificationToken,
}

impl<E> ChangeStream<E> {
    pub(crate) fn push_initial(sink: &Sink<E>, event: E) {
        sink.deliver(Ok(Delivery::Event(event)));
    }

    /// Blocks until the next event.
    pub fn recv(&self) -> Option<CoreResult<E>> {
        match self.receiver.recv() {
            Ok(event) => Some(Ok(event)),
            Err(_) => self.closed(),
        }
    }

    /// Returns the next event if one is buffered.
    pub fn try_recv(&self) -> Option<CoreResult<E>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.closed(),
        }
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CoreResult<E>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(Ok(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.closed(),
        }
    }

    fn closed(&self) -> Option<CoreResult<E>> {
        self.reason.lock().take().map(Err)
    }

    /// The registration token.
    #[must_use]
    pub fn token(&self) -> &NotificationToken {
        &self.token
    }

    /// Stops deliveries. Buffered events can still be received.
    pub fn dispose(&self) -> bool {
        self.token.dispose()
    }
}

impl<E> Iterator for ChangeStream<E> {
    type Item = CoreResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl<E> std::fmt::Debug for ChangeStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_engine::InMemoryEngine;

    fn detached_token() -> NotificationToken {
        let engine: Arc<dyn Engine> = Arc::new(InMemoryEngine::new());
        NotificationToken::new(Arc::downgrade(&engine))
    }

    #[test]
    fn dispose_happens_once() {
        let token = detached_token();
        let clone = token.clone();
        assert!(token.dispose());
        assert!(!clone.dispose());
        assert!(clone.is_disposed());
    }

    #[test]
    fn events_are_delivered_in_order() {
        let (sink, stream) = channel::<u32>(detached_token(), 4);
        ChangeStream::push_initial(&sink, 0);
        sink.deliver(Ok(Delivery::Skip));
        sink.deliver(Ok(Delivery::Event(1)));
        sink.deliver(Ok(Delivery::Last(2)));
        sink.deliver(Ok(Delivery::Event(3)));

        let received: Vec<u32> = stream.map(|event| event.unwrap()).collect();
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[test]
    fn overflow_closes_with_error() {
        let (sink, stream) = channel::<u32>(detached_token(), 2);
        for i in 0..3 {
            sink.deliver(Ok(Delivery::Event(i)));
        }
        assert!(stream.token().is_disposed());
        assert_eq!(stream.recv().unwrap().unwrap(), 0);
        assert_eq!(stream.recv().unwrap().unwrap(), 1);
        assert_eq!(
            stream.recv().unwrap().unwrap_err(),
            CoreError::NotificationOverflow { capacity: 2 }
        );
        assert!(stream.recv().is_none());
    }

    #[test]
    fn translation_error_closes_stream() {
        let (sink, stream) = channel::<u32>(detached_token(), 2);
        sink.deliver(Err(CoreError::invalid_object()));
        assert!(matches!(
            stream.try_recv(),
            Some(Err(CoreError::InvalidatedObject { .. }))
        ));
        assert!(stream.try_recv().is_none());
    }
}
