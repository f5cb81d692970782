use crate::{
    config::Config,
    consumer::Consumer,
    error::Result,
    stream::{Registry, WritableStream},
};
use dashmap::DashMap;
use std::sync::Arc;

/// Routes values tagged with a string key into independently consumable
/// per-key ordered streams.
///
/// Keys are created lazily by [`write`](StreamDemux::write) and
/// [`stream`](StreamDemux::stream); an unknown key is never an error, by
/// design, so subscribing before or after the first write for a key is
/// never a race. Every `stream(key)` call returns an independent cursor.
///
/// Key lifecycle is driven by consumer bookkeeping: a closed key stays in
/// the map until its last consumer detaches (see
/// [`Config::retain_closed_streams`] for the zero-consumer case), and a
/// write to a key whose current stream is closed installs a fresh open
/// stream while consumers of the old one keep draining it.
#[derive(Debug)]
pub struct StreamDemux<T> {
    streams: Arc<DashMap<String, WritableStream<T>>>,
    config: Arc<Config>,
}

impl<T> Clone for StreamDemux<T> {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Clone> StreamDemux<T> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    fn fresh_stream(&self, key: &str) -> WritableStream<T> {
        WritableStream::with_registry(
            Arc::clone(&self.config),
            Registry {
                map: Arc::downgrade(&self.streams),
                key: key.to_string(),
            },
        )
    }

    /// The current stream for `key`, creating it on demand and replacing
    /// it when the current one is closed.
    fn current_stream(&self, key: &str) -> WritableStream<T> {
        let mut entry = self
            .streams
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(key, "created stream");
                self.fresh_stream(key)
            });
        if entry.is_closed() {
            *entry.value_mut() = self.fresh_stream(key);
        }
        entry.clone()
    }

    /// Append a value to the stream for `key`, creating it on demand.
    /// Never blocks; slow consumers only grow the key's buffer.
    pub fn write(&self, key: &str, value: T) -> Result<u64> {
        self.current_stream(key).write(value)
    }

    /// A fresh independent consumer for `key`. Attaches at the current
    /// tail of the key's current stream, so it observes only values
    /// written after this call (or the retained terminal of a closed
    /// stream).
    pub fn stream(&self, key: &str) -> Consumer<T> {
        let stream = self
            .streams
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(key, "created stream");
                self.fresh_stream(key)
            })
            .clone();
        stream.consumer()
    }

    /// A consumer for `key` replaying from `seq`, which must still be
    /// retained in that key's buffer.
    pub fn stream_since(&self, key: &str, seq: u64) -> Result<Consumer<T>> {
        let stream = self
            .streams
            .entry(key.to_string())
            .or_insert_with(|| self.fresh_stream(key))
            .clone();
        stream.consumer_since(seq)
    }

    fn current(&self, key: &str) -> Option<WritableStream<T>> {
        self.streams.get(key).map(|entry| entry.clone())
    }

    /// Close the stream for `key` without a close value. No-op returning
    /// `false` when the key has no current stream or it is already
    /// closed.
    pub fn close(&self, key: &str) -> bool {
        match self.current(key) {
            Some(stream) => stream.close(),
            None => false,
        }
    }

    /// Close the stream for `key`, delivering `value` to each of its
    /// consumers exactly once as the terminal packet.
    pub fn close_with(&self, key: &str, value: T) -> bool {
        match self.current(key) {
            Some(stream) => stream.close_with(value),
            None => false,
        }
    }

    /// Close the stream for `key` with a terminal error.
    pub fn close_with_error(&self, key: &str, reason: impl Into<String>) -> bool {
        match self.current(key) {
            Some(stream) => stream.close_with_error(reason),
            None => false,
        }
    }

    /// Close every keyed stream without a close value. Returns how many
    /// streams this call transitioned to closed.
    pub fn close_all(&self) -> usize {
        self.collect_streams()
            .into_iter()
            .filter(|stream| stream.close())
            .count()
    }

    /// Close every keyed stream with the same close value.
    pub fn close_all_with(&self, value: T) -> usize {
        self.collect_streams()
            .into_iter()
            .filter(|stream| stream.close_with(value.clone()))
            .count()
    }

    // Snapshot handles before acting: closing can remove entries from the
    // map, which must not happen while iterating it.
    fn collect_streams(&self) -> Vec<WritableStream<T>> {
        self.streams.iter().map(|entry| entry.clone()).collect()
    }

    /// Worst consumer lag for one key; 0 for unknown keys.
    pub fn backpressure_of(&self, key: &str) -> usize {
        self.streams
            .get(key)
            .map(|entry| entry.backpressure())
            .unwrap_or(0)
    }

    /// Worst consumer lag across all keys, the connection-wide figure
    /// upstream flow control throttles on.
    pub fn backpressure(&self) -> usize {
        self.streams
            .iter()
            .map(|entry| entry.backpressure())
            .max()
            .unwrap_or(0)
    }

    /// Live consumers attached to one key; 0 for unknown keys.
    pub fn consumer_count_of(&self, key: &str) -> usize {
        self.streams
            .get(key)
            .map(|entry| entry.consumer_count())
            .unwrap_or(0)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.streams.contains_key(key)
    }

    /// Number of keys currently mapped (open streams plus retained closed
    /// ones).
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl<T: Clone> Default for StreamDemux<T> {
    fn default() -> Self {
        Self::new()
    }
}
