use crate::{config::Config, consumer::Consumer, demux::StreamDemux, error::Result};

/// Named-event façade over a [`StreamDemux`].
///
/// An event name is simply a demux key, so channel publish fan-out,
/// request/response matching and lifecycle notification all reduce to
/// "attach a consumer to a named stream and iterate until done". The
/// emitter carries no state of its own.
///
/// # Examples
///
/// ```rust
/// use dmux::{Packet, StreamEmitter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let emitter = StreamEmitter::new();
/// let mut listener = emitter.listener("connect");
/// emitter.emit("connect", "socket-1").unwrap();
///
/// assert_eq!(listener.next().await, Packet::Item("socket-1"));
/// # }
/// ```
#[derive(Debug)]
pub struct StreamEmitter<T> {
    demux: StreamDemux<T>,
}

impl<T> Clone for StreamEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            demux: self.demux.clone(),
        }
    }
}

impl<T: Clone> StreamEmitter<T> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            demux: StreamDemux::with_config(config),
        }
    }

    /// Publish `data` under `name`. The named stream is created lazily,
    /// so emitting before any listener exists is silent, never an error.
    pub fn emit(&self, name: &str, data: T) -> Result<u64> {
        self.demux.write(name, data)
    }

    /// A fresh independent listener that observes every event emitted
    /// under `name` after this call.
    pub fn listener(&self, name: &str) -> Consumer<T> {
        self.demux.stream(name)
    }

    /// End the named stream; each listener observes the end exactly once.
    /// No-op returning `false` for unknown names.
    pub fn close_listener(&self, name: &str) -> bool {
        self.demux.close(name)
    }

    /// End the named stream with a final value.
    pub fn close_listener_with(&self, name: &str, value: T) -> bool {
        self.demux.close_with(name, value)
    }

    /// End the named stream with a terminal error.
    pub fn close_listener_with_error(&self, name: &str, reason: impl Into<String>) -> bool {
        self.demux.close_with_error(name, reason)
    }

    /// End every named stream. Returns how many were still open.
    pub fn close_all_listeners(&self) -> usize {
        self.demux.close_all()
    }

    /// Worst listener lag for one event name.
    pub fn backpressure_of(&self, name: &str) -> usize {
        self.demux.backpressure_of(name)
    }

    /// Worst listener lag across all event names.
    pub fn backpressure(&self) -> usize {
        self.demux.backpressure()
    }

    /// Live listeners attached to one event name.
    pub fn listener_count(&self, name: &str) -> usize {
        self.demux.consumer_count_of(name)
    }
}

impl<T: Clone> Default for StreamEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Close, Packet};

    #[tokio::test]
    async fn test_emit_before_listener_is_silent() {
        let emitter = StreamEmitter::new();
        emitter.emit("ready", 1).unwrap();

        let mut listener = emitter.listener("ready");
        emitter.emit("ready", 2).unwrap();

        assert_eq!(listener.next().await, Packet::Item(2));
    }

    #[tokio::test]
    async fn test_multiple_listeners_fan_out() {
        let emitter = StreamEmitter::new();
        let mut first = emitter.listener("tick");
        let mut second = emitter.listener("tick");
        assert_eq!(emitter.listener_count("tick"), 2);

        emitter.emit("tick", "t0").unwrap();

        assert_eq!(first.next().await, Packet::Item("t0"));
        assert_eq!(second.next().await, Packet::Item("t0"));
    }

    #[tokio::test]
    async fn test_close_all_listeners() {
        let emitter: StreamEmitter<()> = StreamEmitter::new();
        let mut connect = emitter.listener("connect");
        let mut close = emitter.listener("close");

        assert_eq!(emitter.close_all_listeners(), 2);
        assert_eq!(connect.next().await, Packet::Done(Close::Empty));
        assert_eq!(close.next().await, Packet::Done(Close::Empty));
    }

    #[tokio::test]
    async fn test_backpressure_queries() {
        let emitter = StreamEmitter::new();
        let _listener = emitter.listener("data");
        emitter.emit("data", 1).unwrap();
        emitter.emit("data", 2).unwrap();

        assert_eq!(emitter.backpressure_of("data"), 2);
        assert_eq!(emitter.backpressure_of("other"), 0);
        assert_eq!(emitter.backpressure(), 2);
    }

    #[tokio::test]
    async fn test_close_listener_with_error() {
        let emitter = StreamEmitter::new();
        let mut listener = emitter.listener("rpc:1");
        emitter.emit("rpc:1", "partial").unwrap();
        assert!(emitter.close_listener_with_error("rpc:1", "timed out"));

        assert_eq!(listener.next().await, Packet::Item("partial"));
        match listener.next().await {
            Packet::Done(Close::Error(err)) => {
                assert_eq!(err.to_string(), "stream aborted: timed out");
            }
            other => panic!("expected terminal error, got {other:?}"),
        }
    }
}
