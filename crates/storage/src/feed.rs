//! In-process change feed. The backend publishes row events into the feed;
//! collections consume them through scoped subscriptions. Delivery is
//! buffered per subscriber on an mpsc channel and drained cooperatively.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use taskdeck_core::TableRow;

use crate::remote::ChangeEvent;

struct Subscriber<R> {
    id: u64,
    scope: Option<String>,
    sender: Sender<ChangeEvent<R>>,
}

struct FeedInner<R> {
    next_id: u64,
    subscribers: Vec<Subscriber<R>>,
}

pub struct ChangeFeed<R> {
    inner: Arc<Mutex<FeedInner<R>>>,
}

impl<R> Clone for ChangeFeed<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> Default for ChangeFeed<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<R>(inner: &Arc<Mutex<FeedInner<R>>>) -> MutexGuard<'_, FeedInner<R>> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl<R> ChangeFeed<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Live subscription count; dropped subscriptions unregister themselves.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    pub fn subscribe(&self, scope: Option<String>) -> Subscription<R> {
        let (sender, receiver) = channel();
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        debug!(subscriber = id, scope = scope.as_deref(), "feed subscribed");
        inner.subscribers.push(Subscriber { id, scope, sender });
        Subscription {
            id,
            receiver,
            feed: Arc::clone(&self.inner),
        }
    }
}

impl<R: TableRow + Clone> ChangeFeed<R> {
    /// Deliver an event to every subscription it is in scope for. An event
    /// whose project cannot be determined goes to everyone; consumers
    /// already ignore ids they do not hold.
    pub fn publish(&self, event: ChangeEvent<R>) {
        let mut inner = lock(&self.inner);
        inner.subscribers.retain(|sub| {
            let in_scope = match (&sub.scope, event.scope()) {
                (None, _) | (_, None) => true,
                (Some(scope), Some(event_scope)) => scope == event_scope,
            };
            if !in_scope {
                return true;
            }
            // A failed send means the receiver is gone without the drop
            // having run yet; unregister it now.
            sub.sender.send(event.clone()).is_ok()
        });
    }
}

/// Handle to a feed subscription. Dropping it unregisters the subscriber,
/// so holding subscriptions exactly as long as the consuming collection
/// lives is enough to avoid leaks.
pub struct Subscription<R> {
    id: u64,
    receiver: Receiver<ChangeEvent<R>>,
    feed: Arc<Mutex<FeedInner<R>>>,
}

impl<R> Subscription<R> {
    pub fn try_recv(&self) -> Option<ChangeEvent<R>> {
        self.receiver.try_recv().ok()
    }

    /// Take every event buffered so far, in arrival order.
    pub fn drain(&self) -> Vec<ChangeEvent<R>> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<R> Drop for Subscription<R> {
    fn drop(&mut self) {
        debug!(subscriber = self.id, "feed subscription released");
        lock(&self.feed).subscribers.retain(|sub| sub.id != self.id);
    }
}
