//! Log processing for catscope
//!
//! This crate provides the logcat line parser, the bounded hand-off queue,
//! the stream reader, the retention buffer, the filter engine, and the drain
//! pipeline tying them together.

mod buffer;
mod filter;
mod parser;
mod pipeline;
mod queue;
mod stream;

pub use buffer::{BatchChange, BufferChange, RetentionBuffer};
pub use filter::{FilterCriteria, FilterEngine, FilteredView};
pub use parser::LogParser;
pub use pipeline::{
    ConnectionState, DrainReport, LogPipeline, PipelineConfig, PipelineObserver, PipelineStats,
    StopCause,
};
pub use queue::{DrainBatch, PushOutcome, QueueConsumer, QueueItem, QueueProducer, channel};
pub use stream::{
    DEFAULT_STOP_TIMEOUT, DEFAULT_TERM_GRACE, LogStreamReader, ReaderState, ReaderStats,
};

// Re-export types used in our public API
pub use catscope_types::{ArcLogRecord, LogRecord, Priority};
