pub mod buffer;
pub mod config;
pub mod consumer;
pub mod demux;
pub mod emitter;
pub mod error;
pub mod stream;
pub mod transform;

pub use buffer::OrderedBuffer;
pub use config::{Config, ConfigBuilder};
pub use consumer::{CancelHandle, Close, ConsumableStream, Consumer, Packet};
pub use demux::StreamDemux;
pub use emitter::StreamEmitter;
pub use error::{DmuxError, Result};
pub use stream::WritableStream;
pub use transform::{Filter, Map, TakeWhile};
