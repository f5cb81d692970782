use crate::{
    buffer::OrderedBuffer,
    config::Config,
    consumer::Consumer,
    error::{DmuxError, Result},
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, Weak,
};
use tokio::sync::Notify;

/// Terminal state of a closed stream. Recorded once at close time; each
/// consumer observes it exactly once when its cursor reaches the close
/// point.
#[derive(Debug, Clone)]
pub(crate) enum Terminal<T> {
    Value(Option<T>),
    Error(DmuxError),
}

/// Backlink from a stream to the demux map that owns it. Used to drop the
/// map entry once the stream is closed and its last consumer detaches, so
/// that key removal is driven by consumer bookkeeping rather than by the
/// write side.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    pub(crate) map: Weak<DashMap<String, WritableStream<T>>>,
    pub(crate) key: String,
}

#[derive(Debug)]
pub(crate) struct StreamState<T> {
    pub(crate) buffer: OrderedBuffer<T>,
    pub(crate) terminal: Option<Terminal<T>>,
    /// Live cursors: consumer id to the next sequence number it will read.
    /// The minimum over all values is the buffer's prune watermark.
    pub(crate) consumers: HashMap<u64, u64>,
}

/// Shared state behind a [`WritableStream`] and all of its consumers.
#[derive(Debug)]
pub(crate) struct StreamInner<T> {
    state: Mutex<StreamState<T>>,
    /// Wakes every consumer suspended in `next()` on write and close.
    pub(crate) notify: Notify,
    pub(crate) config: Arc<Config>,
    next_consumer_id: AtomicU64,
    registry: Option<Registry<T>>,
}

impl<T> StreamInner<T> {
    pub(crate) fn new(config: Arc<Config>, registry: Option<Registry<T>>) -> Self {
        Self {
            state: Mutex::new(StreamState {
                buffer: OrderedBuffer::new(),
                terminal: None,
                consumers: HashMap::new(),
            }),
            notify: Notify::new(),
            config,
            next_consumer_id: AtomicU64::new(1),
            registry,
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StreamState<T>> {
        self.state.lock().expect("stream state poisoned")
    }

    /// Prune the buffer up to the lowest live cursor position. With no
    /// live cursors every appended item is already unreachable and is
    /// dropped immediately.
    pub(crate) fn prune_locked(state: &mut StreamState<T>) {
        let watermark = state
            .consumers
            .values()
            .copied()
            .min()
            .unwrap_or_else(|| state.buffer.next_seq());
        state.buffer.prune(watermark);
    }

    fn backpressure_locked(state: &StreamState<T>) -> usize {
        let next_seq = state.buffer.next_seq();
        state
            .consumers
            .values()
            .map(|position| (next_seq - position) as usize)
            .max()
            .unwrap_or(0)
    }

    /// Deregister a cursor. Idempotent. When the stream is closed and this
    /// was its last cursor, the owning demux entry (if any) is removed.
    pub(crate) fn detach(&self, consumer_id: u64) {
        let now_idle = {
            let mut state = self.lock_state();
            if state.consumers.remove(&consumer_id).is_none() {
                return;
            }
            Self::prune_locked(&mut state);
            state.terminal.is_some() && state.consumers.is_empty()
        };
        if now_idle {
            self.remove_registry_entry();
        }
    }

    fn remove_registry_entry(&self) {
        if let Some(registry) = &self.registry {
            if let Some(map) = registry.map.upgrade() {
                // Identity check: only remove the entry if it still maps
                // to this exact stream; a fresh stream may have replaced
                // it in the meantime.
                let removed = map
                    .remove_if(&registry.key, |_, stream| {
                        std::ptr::eq(Arc::as_ptr(&stream.inner), self)
                    })
                    .is_some();
                if removed {
                    tracing::debug!(key = %registry.key, "removed drained stream");
                }
            }
        }
    }

    pub(crate) fn write(&self, value: T) -> Result<u64> {
        let seq = {
            let mut state = self.lock_state();
            if state.terminal.is_some() {
                return Err(DmuxError::StreamClosed);
            }
            let seq = state.buffer.append(value);
            if let Some(threshold) = self.config.backpressure_warn_threshold {
                let lag = Self::backpressure_locked(&state);
                // Lag grows one item per write, so this fires once per
                // build-up episode.
                if lag == threshold {
                    tracing::warn!(lag, threshold, "consumer lag reached warn threshold");
                }
            }
            Self::prune_locked(&mut state);
            seq
        };
        self.notify.notify_waiters();
        tracing::trace!(seq, "wrote value");
        Ok(seq)
    }

    /// Record the terminal state and wake all consumers. A second close is
    /// a no-op returning `false`.
    pub(crate) fn end(&self, terminal: Terminal<T>) -> bool {
        let (closed, idle) = {
            let mut state = self.lock_state();
            if state.terminal.is_some() {
                (false, false)
            } else {
                state.terminal = Some(terminal);
                (true, state.consumers.is_empty())
            }
        };
        if closed {
            self.notify.notify_waiters();
            tracing::debug!("stream closed");
            if idle && !self.config.retain_closed_streams {
                self.remove_registry_entry();
            }
        }
        closed
    }

    /// Register a fresh cursor at the current tail, returning its id and
    /// starting position.
    fn register(&self) -> (u64, u64) {
        let id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock_state();
        let position = state.buffer.next_seq();
        state.consumers.insert(id, position);
        (id, position)
    }

    /// Register a cursor replaying from a retained sequence number.
    fn register_since(&self, seq: u64) -> Result<u64> {
        let id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock_state();
        if seq < state.buffer.start_seq() || seq > state.buffer.next_seq() {
            return Err(DmuxError::ReplayUnavailable {
                requested: seq,
                oldest: state.buffer.start_seq(),
            });
        }
        state.consumers.insert(id, seq);
        Ok(id)
    }
}

/// The single-producer interface over one ordered buffer.
///
/// A `WritableStream` owns the items it buffers and hands out any number
/// of independent [`Consumer`]s, each with its own read position. Writes
/// never block on slow consumers; the buffer grows until consumers catch
/// up or cancel, and [`backpressure`](WritableStream::backpressure)
/// reports the worst lag so the caller can throttle upstream.
///
/// Cloning the handle is cheap and shares the same underlying stream.
#[derive(Debug)]
pub struct WritableStream<T> {
    pub(crate) inner: Arc<StreamInner<T>>,
}

impl<T> Clone for WritableStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> WritableStream<T> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(StreamInner::new(Arc::new(config), None)),
        }
    }

    pub(crate) fn with_registry(config: Arc<Config>, registry: Registry<T>) -> Self {
        Self {
            inner: Arc::new(StreamInner::new(config, Some(registry))),
        }
    }

    /// Append a value. Fails with [`DmuxError::StreamClosed`] once the
    /// stream has been closed.
    pub fn write(&self, value: T) -> Result<u64> {
        self.inner.write(value)
    }

    /// Close the stream with no close value. Returns `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        self.inner.end(Terminal::Value(None))
    }

    /// Close the stream, delivering `value` exactly once to each consumer
    /// as its terminal packet. Returns `false` if already closed.
    pub fn close_with(&self, value: T) -> bool {
        self.inner.end(Terminal::Value(Some(value)))
    }

    /// Close the stream with an error that every live and future consumer
    /// observes as a terminal [`Close::Error`](crate::Close::Error)
    /// packet. Returns `false` if already closed.
    pub fn close_with_error(&self, reason: impl Into<String>) -> bool {
        self.inner
            .end(Terminal::Error(DmuxError::Aborted(reason.into())))
    }

    /// Create an independent consumer positioned at the current tail: it
    /// observes only values written after this call.
    pub fn consumer(&self) -> Consumer<T> {
        let (id, position) = self.inner.register();
        Consumer::new(Arc::clone(&self.inner), id, position)
    }

    /// Create a consumer replaying from `seq`, which must still be
    /// retained in the buffer (an item is retained while some live cursor
    /// has not read past it).
    pub fn consumer_since(&self, seq: u64) -> Result<Consumer<T>> {
        let id = self.inner.register_since(seq)?;
        Ok(Consumer::new(Arc::clone(&self.inner), id, seq))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().terminal.is_some()
    }

    /// Sequence number the next write will receive.
    pub fn next_seq(&self) -> u64 {
        self.inner.lock_state().buffer.next_seq()
    }

    /// Number of live consumers attached to this stream.
    pub fn consumer_count(&self) -> usize {
        self.inner.lock_state().consumers.len()
    }

    /// Number of items currently buffered (written but not yet read by at
    /// least one live consumer).
    pub fn buffered(&self) -> usize {
        self.inner.lock_state().buffer.len()
    }

    /// Worst lag across live consumers: how many items the slowest one
    /// has yet to read. Zero with no consumers.
    pub fn backpressure(&self) -> usize {
        StreamInner::backpressure_locked(&self.inner.lock_state())
    }
}

impl<T: Clone> Default for WritableStream<T> {
    fn default() -> Self {
        Self::new()
    }
}
