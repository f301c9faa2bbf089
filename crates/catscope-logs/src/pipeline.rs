use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, info};

use crate::buffer::{BatchChange, RetentionBuffer};
use crate::filter::{FilterEngine, FilteredView};
use crate::queue::{QueueConsumer, channel};
use crate::stream::{
    DEFAULT_STOP_TIMEOUT, DEFAULT_TERM_GRACE, LogStreamReader, ReaderState, ReaderStats,
};
use catscope_adb::{BridgeClient, BridgeCommand, LogcatRequest, RetryPolicy};
use catscope_types::{ArcLogRecord, Priority};

/// Tunables of a pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Retention buffer capacity in records
    pub buffer_capacity: usize,
    /// Hand-off queue capacity in records
    pub queue_capacity: usize,
    /// Period between drain ticks
    pub drain_interval: Duration,
    /// Maximum records dequeued per tick
    pub drain_batch: usize,
    /// Grace period for the reader to stop
    pub stop_timeout: Duration,
    /// PID resolution retries
    pub pid_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 500_000,
            queue_capacity: 10_000,
            drain_interval: Duration::from_millis(50),
            drain_batch: 500,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            pid_retry: RetryPolicy::default(),
        }
    }
}

/// Why a connection ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCause {
    /// `disconnect` or `shutdown` was called
    Requested,
    /// The bridge process exited on its own
    Exited,
    /// The bridge process could not be launched
    LaunchFailed,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Requested => write!(f, "disconnected"),
            StopCause::Exited => write!(f, "logcat exited"),
            StopCause::LaunchFailed => write!(f, "failed to launch logcat"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected {
        device: Option<String>,
        pid: Option<String>,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

/// What one drain tick did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrainReport {
    /// Records added to the buffer
    pub appended: usize,
    /// Records evicted from the buffer
    pub evicted: usize,
    /// Buffer rows the appended records now occupy
    pub inserted: Option<Range<usize>>,
    /// Visible rows after the tick
    pub visible: usize,
    /// Buffered rows after the tick
    pub total: usize,
    /// Set when the connection ended during this tick
    pub stopped: Option<StopCause>,
    /// The tick was skipped because the pipeline is paused
    pub paused: bool,
}

/// Snapshot of counters for a status line
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub visible: usize,
    pub total: usize,
    pub capacity: usize,
    pub fill_percent: f64,
    /// Records waiting in the hand-off queue
    pub queued: usize,
    /// Records dropped because the queue was full, over all connections
    pub dropped: u64,
    pub reader: ReaderStats,
    pub paused: bool,
    pub connected: bool,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} lines | buffer {:.1}%",
            self.visible, self.total, self.fill_percent
        )?;
        if self.dropped > 0 {
            write!(f, " | {} dropped", self.dropped)?;
        }
        if self.paused {
            write!(f, " | paused")?;
        }
        if !self.connected {
            write!(f, " | disconnected")?;
        }
        Ok(())
    }
}

/// Receives change notifications from a [`LogPipeline`].
///
/// Every method has an empty default so consumers implement only what they
/// render. Removal is always reported before the insertion of the same batch.
pub trait PipelineObserver {
    /// Rows removed from the front, indices before removal
    fn rows_removed(&mut self, _rows: Range<usize>) {}

    /// Rows appended at the back, indices after removal
    fn rows_inserted(&mut self, _view: &FilteredView<'_>, _rows: Range<usize>) {}

    /// The buffer was cleared
    fn buffer_reset(&mut self) {}

    /// Criteria changed and the visible count was recomputed
    fn filter_changed(&mut self, _view: &FilteredView<'_>) {}

    /// A batch was applied
    fn data_available(&mut self, _view: &FilteredView<'_>) {}

    /// The connection ended
    fn reader_stopped(&mut self, _cause: StopCause) {}
}

impl PipelineObserver for () {}

/// The drain side: owns the buffer, the filter and the current connection.
///
/// All methods run on one control task. The reader task shares nothing with
/// it except the queue.
pub struct LogPipeline<O: PipelineObserver = ()> {
    bridge: BridgeClient,
    config: PipelineConfig,
    buffer: RetentionBuffer,
    filter: FilterEngine,
    reader: Option<LogStreamReader>,
    consumer: Option<QueueConsumer>,
    connection: ConnectionState,
    paused: bool,

    // Counters carried over from finished connections
    dropped: u64,
    last_reader: ReaderStats,

    observer: O,
}

impl LogPipeline<()> {
    /// Create a pipeline without an observer
    pub fn new(bridge: BridgeClient, config: PipelineConfig) -> Self {
        Self::with_observer(bridge, config, ())
    }
}

impl<O: PipelineObserver> LogPipeline<O> {
    pub fn with_observer(bridge: BridgeClient, config: PipelineConfig, observer: O) -> Self {
        Self {
            bridge,
            buffer: RetentionBuffer::new(config.buffer_capacity),
            config,
            filter: FilterEngine::new(),
            reader: None,
            consumer: None,
            connection: ConnectionState::Disconnected,
            paused: false,
            dropped: 0,
            last_reader: ReaderStats::default(),
            observer,
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Resolve a package PID with the configured retry policy
    pub async fn resolve_pid(&self, device: Option<&str>, package: &str) -> Option<String> {
        self.bridge
            .resolve_pid(device, package, self.config.pid_retry)
            .await
    }

    /// Start streaming `logcat` for a request, ending any current connection
    pub async fn connect(&mut self, request: &LogcatRequest) -> ReaderState {
        let command = self.bridge.logcat_command(request);
        self.connect_command(command, request.device.clone(), request.pid.clone())
            .await
    }

    /// Start streaming from an arbitrary command.
    ///
    /// Each connection gets a fresh queue so nothing from a previous session
    /// leaks into this one. A launch failure is reported by the next tick.
    pub async fn connect_command(
        &mut self,
        command: BridgeCommand,
        device: Option<String>,
        pid: Option<String>,
    ) -> ReaderState {
        if self.reader.is_some() {
            self.disconnect().await;
        }

        info!(%command, "connecting");
        let (producer, consumer) = channel(self.config.queue_capacity);
        let mut reader = LogStreamReader::new(command)
            .with_stop_timeout(self.config.stop_timeout)
            .with_term_grace(DEFAULT_TERM_GRACE.min(self.config.stop_timeout / 2));
        let state = reader.start(producer);

        self.reader = Some(reader);
        self.consumer = Some(consumer);
        self.connection = ConnectionState::Connected { device, pid };
        state
    }

    /// Stop the reader and keep whatever it already queued.
    ///
    /// Returns `None` when there was no connection.
    pub async fn disconnect(&mut self) -> Option<StopCause> {
        if self.reader.is_none() && self.consumer.is_none() {
            return None;
        }
        Some(self.close(StopCause::Requested).await)
    }

    /// Disconnect, applying queued records even while paused
    pub async fn shutdown(&mut self) -> Option<StopCause> {
        self.paused = false;
        self.disconnect().await
    }

    async fn close(&mut self, cause: StopCause) -> StopCause {
        let mut cause = cause;
        if let Some(mut reader) = self.reader.take() {
            reader.stop().await;
            if reader.state() == ReaderState::Failed {
                cause = StopCause::LaunchFailed;
            }
            self.last_reader = reader.stats();
        }

        if let Some(mut consumer) = self.consumer.take() {
            if !self.paused {
                loop {
                    let batch = consumer.pop_batch(self.config.drain_batch);
                    if batch.records.is_empty() {
                        break;
                    }
                    self.apply(batch.records);
                }
            }
            self.dropped += consumer.dropped();
        }

        self.connection = ConnectionState::Disconnected;
        debug!(%cause, "connection closed");
        self.observer.reader_stopped(cause);
        cause
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Run one drain tick.
    ///
    /// Dequeues up to the configured batch without waiting. End of stream
    /// stops dequeuing; records taken before it are still applied, then the
    /// connection is closed.
    pub async fn tick(&mut self) -> DrainReport {
        let mut report = DrainReport {
            paused: self.paused,
            ..Default::default()
        };

        if !self.paused {
            if let Some(consumer) = self.consumer.as_mut() {
                let batch = consumer.pop_batch(self.config.drain_batch);
                let change = self.apply(batch.records);
                report.appended = change.inserted_len();
                report.evicted = change.removed_len();
                report.inserted = change.inserted;

                if batch.end_of_stream {
                    report.stopped = Some(self.close(StopCause::Exited).await);
                }
            }
        }

        report.visible = self.filter.visible_count();
        report.total = self.buffer.len();
        report
    }

    fn apply(&mut self, records: Vec<ArcLogRecord>) -> BatchChange {
        let change = self.buffer.append_batch(records);
        if change.is_empty() {
            return change;
        }
        self.filter.apply_batch(&self.buffer, &change);

        let view = FilteredView::new(&self.buffer, &self.filter);
        if let Some(rows) = change.removed.clone() {
            self.observer.rows_removed(rows);
        }
        if let Some(rows) = change.inserted.clone() {
            self.observer.rows_inserted(&view, rows);
        }
        self.observer.data_available(&view);
        change
    }

    /// Skip drain ticks until [`resume`](Self::resume); the queue keeps
    /// filling and sheds records once full
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drop every buffered record
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.filter.reset();
        self.observer.buffer_reset();
    }

    // ========================================================================
    // Filtering
    // ========================================================================

    pub fn set_text_filter(&mut self, query: &str, is_regex: bool) -> usize {
        self.filter.set_text_filter(query, is_regex);
        self.refilter()
    }

    pub fn set_tag_filter(&mut self, tags: HashSet<String>) -> usize {
        self.filter.set_tag_filter(tags);
        self.refilter()
    }

    pub fn set_min_priority(&mut self, priority: Priority) -> usize {
        self.filter.set_min_priority(priority);
        self.refilter()
    }

    pub fn set_pid_filter(&mut self, pid: &str) -> usize {
        self.filter.set_pid_filter(pid);
        self.refilter()
    }

    pub fn clear_filters(&mut self) -> usize {
        self.filter.clear_filters();
        self.refilter()
    }

    fn refilter(&mut self) -> usize {
        let visible = self.filter.refilter(&self.buffer);
        let view = FilteredView::new(&self.buffer, &self.filter);
        self.observer.filter_changed(&view);
        visible
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn view(&self) -> FilteredView<'_> {
        FilteredView::new(&self.buffer, &self.filter)
    }

    pub fn buffer(&self) -> &RetentionBuffer {
        &self.buffer
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// State of the current reader, `None` when disconnected
    pub fn reader_state(&self) -> Option<ReaderState> {
        self.reader.as_ref().map(LogStreamReader::state)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn bridge(&self) -> &BridgeClient {
        &self.bridge
    }

    pub fn drain_interval(&self) -> Duration {
        self.config.drain_interval
    }

    pub fn stats(&self) -> PipelineStats {
        let (queued, dropped) = self
            .consumer
            .as_ref()
            .map_or((0, 0), |c| (c.len(), c.dropped()));
        PipelineStats {
            visible: self.filter.visible_count(),
            total: self.buffer.len(),
            capacity: self.buffer.capacity(),
            fill_percent: self.buffer.fill_percent(),
            queued,
            dropped: self.dropped + dropped,
            reader: self
                .reader
                .as_ref()
                .map_or(self.last_reader, LogStreamReader::stats),
            paused: self.paused,
            connected: self.connection.is_connected(),
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }
}
