use crate::{
    error::DmuxError,
    stream::{StreamInner, Terminal},
    transform::{Filter, Map, TakeWhile},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::sync::Notify;

/// Outcome of a single [`next`](Consumer::next) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<T> {
    /// A value written after this consumer attached.
    Item(T),
    /// The stream terminated; see [`Close`] for what was observed.
    Done(Close<T>),
}

/// Terminal observation carried by a [`Packet::Done`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Close<T> {
    /// The close value. Each consumer observes this exactly once, on the
    /// first `next()` call after it has drained everything written before
    /// the close.
    Value(T),
    /// The stream was closed with an error; observed exactly once per
    /// consumer, like a close value.
    Error(DmuxError),
    /// Nothing left to observe: the consumer already saw the terminal,
    /// was cancelled, or the stream closed without a close value.
    Empty,
}

impl<T> Packet<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Packet::Done(_))
    }

    /// The carried value, whether an item or a close value.
    pub fn value(&self) -> Option<&T> {
        match self {
            Packet::Item(value) | Packet::Done(Close::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Packet::Item(value) | Packet::Done(Close::Value(value)) => Some(value),
            _ => None,
        }
    }
}

/// The polymorphic lazy-sequence capability: anything with a suspending
/// `next()` and a cooperative `cancel()` can be consumed uniformly,
/// including the [`map`](ConsumableStream::map),
/// [`filter`](ConsumableStream::filter) and
/// [`take_while`](ConsumableStream::take_while) wrappers, which propagate
/// cancellation to the stream they wrap.
#[allow(async_fn_in_trait)]
pub trait ConsumableStream: Sized {
    type Item;

    /// Suspend until something is observable at the read position, then
    /// yield it. Safe and idempotent after the terminal packet.
    async fn next(&mut self) -> Packet<Self::Item>;

    /// Cooperatively cancel: any suspended `next()` resolves with
    /// `Done(Empty)` and every later call returns the same immediately.
    fn cancel(&self);

    fn map<U, F>(self, op: F) -> Map<Self, F>
    where
        F: FnMut(Self::Item) -> U,
    {
        Map::new(self, op)
    }

    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        F: FnMut(&Self::Item) -> bool,
    {
        Filter::new(self, predicate)
    }

    fn take_while<F>(self, predicate: F) -> TakeWhile<Self, F>
    where
        F: FnMut(&Self::Item) -> bool,
    {
        TakeWhile::new(self, predicate)
    }
}

/// Cancellation flag shared between a consumer, its handles, and any
/// `next()` call suspended on it.
#[derive(Debug, Default)]
pub(crate) struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable handle that cancels one specific consumer from another task,
/// even while that consumer is suspended in `next()`.
#[derive(Debug)]
pub struct CancelHandle<T> {
    stream: Weak<StreamInner<T>>,
    consumer_id: u64,
    cancel: Arc<CancelState>,
}

impl<T> Clone for CancelHandle<T> {
    fn clone(&self) -> Self {
        Self {
            stream: Weak::clone(&self.stream),
            consumer_id: self.consumer_id,
            cancel: Arc::clone(&self.cancel),
        }
    }
}

impl<T> CancelHandle<T> {
    pub fn cancel(&self) {
        if !self.cancel.cancelled.swap(true, Ordering::Relaxed) {
            self.cancel.notify.notify_waiters();
            if let Some(inner) = self.stream.upgrade() {
                inner.detach(self.consumer_id);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.cancelled.load(Ordering::Relaxed)
    }
}

/// A consumer's private cursor into a stream's buffer.
///
/// Each consumer advances independently; none can observe or disturb
/// another's read position, and a cursor keeps alive exactly the items it
/// has not read yet. Dropping a consumer releases its buffer reference so
/// pruning can proceed.
#[derive(Debug)]
pub struct Consumer<T> {
    inner: Arc<StreamInner<T>>,
    id: u64,
    /// Next sequence number to read.
    position: u64,
    /// Set once the terminal packet has been observed or the cursor was
    /// cancelled; the cursor is detached from the stream at that point.
    finished: bool,
    cancel: Arc<CancelState>,
}

impl<T> Consumer<T> {
    pub(crate) fn new(inner: Arc<StreamInner<T>>, id: u64, position: u64) -> Self {
        Self {
            inner,
            id,
            position,
            finished: false,
            cancel: Arc::new(CancelState::default()),
        }
    }

    /// Cancel this cursor: immediate and irrevocable. A `next()` call
    /// suspended in another task resolves with `Done(Empty)`, and the
    /// cursor's buffer reference is released so pruning can proceed.
    pub fn cancel(&self) {
        if !self.cancel.cancelled.swap(true, Ordering::Relaxed) {
            self.cancel.notify.notify_waiters();
            self.inner.detach(self.id);
        }
    }

    /// A cloneable handle for cancelling this consumer from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            stream: Arc::downgrade(&self.inner),
            consumer_id: self.id,
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Whether an unread item is buffered at this cursor's position.
    pub fn has_next(&self) -> bool {
        if self.finished || self.cancel.cancelled.load(Ordering::Relaxed) {
            return false;
        }
        self.inner.lock_state().buffer.get(self.position).is_some()
    }

    /// How many items have been written past this cursor but not yet read
    /// by it.
    pub fn backpressure(&self) -> usize {
        if self.finished {
            return 0;
        }
        let state = self.inner.lock_state();
        (state.buffer.next_seq() - self.position) as usize
    }
}

impl<T: Clone> Consumer<T> {
    /// Suspend until an item is available at this cursor's position, the
    /// stream closes, or the cursor is cancelled.
    pub async fn next(&mut self) -> Packet<T> {
        let inner = Arc::clone(&self.inner);
        let cancel = Arc::clone(&self.cancel);
        loop {
            // Register both wakeup paths before re-checking state, so a
            // write, close, or cancel between the check and the await
            // cannot be missed.
            let wake = inner.notify.notified();
            let cancelled = cancel.notify.notified();
            tokio::pin!(wake, cancelled);
            wake.as_mut().enable();
            cancelled.as_mut().enable();

            if let Some(packet) = self.try_next() {
                return packet;
            }

            tokio::select! {
                _ = wake => {}
                _ = cancelled => {}
            }
        }
    }

    /// Non-suspending variant of `next`: `None` means the call would have
    /// suspended.
    fn try_next(&mut self) -> Option<Packet<T>> {
        if self.finished {
            return Some(Packet::Done(Close::Empty));
        }
        if self.cancel.cancelled.load(Ordering::Relaxed) {
            self.finished = true;
            self.inner.detach(self.id);
            return Some(Packet::Done(Close::Empty));
        }

        let mut state = self.inner.lock_state();
        if let Some(value) = state.buffer.get(self.position).cloned() {
            self.position += 1;
            state.consumers.insert(self.id, self.position);
            StreamInner::prune_locked(&mut state);
            return Some(Packet::Item(value));
        }

        let terminal = state.terminal.clone()?;
        drop(state);
        self.finished = true;
        self.inner.detach(self.id);
        Some(Packet::Done(match terminal {
            Terminal::Value(Some(value)) => Close::Value(value),
            Terminal::Value(None) => Close::Empty,
            Terminal::Error(err) => Close::Error(err),
        }))
    }

    /// Synchronously look at the item `next()` would yield, without
    /// advancing. `None` when `next()` would suspend or the stream is
    /// done.
    pub fn peek(&self) -> Option<T> {
        if self.finished || self.cancel.cancelled.load(Ordering::Relaxed) {
            return None;
        }
        self.inner.lock_state().buffer.get(self.position).cloned()
    }

    /// Adapt this consumer into a `futures::Stream` of items. The stream
    /// ends at the terminal packet; close values are discarded.
    pub fn into_stream(self) -> impl futures::Stream<Item = T> {
        futures::stream::unfold(self, |mut consumer| async move {
            match consumer.next().await {
                Packet::Item(value) => Some((value, consumer)),
                Packet::Done(_) => None,
            }
        })
    }
}

impl<T: Clone> ConsumableStream for Consumer<T> {
    type Item = T;

    async fn next(&mut self) -> Packet<T> {
        Consumer::next(self).await
    }

    fn cancel(&self) {
        Consumer::cancel(self);
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        // Detach is idempotent; a finished or cancelled cursor already
        // released its position.
        if !self.finished {
            self.inner.detach(self.id);
        }
    }
}
