use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::parser::LogParser;
use crate::queue::{PushOutcome, QueueProducer};
use catscope_adb::BridgeCommand;

/// Default grace period for the reader task to wind down
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the child gets to exit after SIGTERM before it is killed
pub const DEFAULT_TERM_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle of a reader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// The child process could not be launched
    Failed,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReaderState::Idle,
            1 => ReaderState::Starting,
            2 => ReaderState::Running,
            3 => ReaderState::Stopping,
            4 => ReaderState::Stopped,
            _ => ReaderState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ReaderState::Idle => 0,
            ReaderState::Starting => 1,
            ReaderState::Running => 2,
            ReaderState::Stopping => 3,
            ReaderState::Stopped => 4,
            ReaderState::Failed => 5,
        }
    }

    /// Check if the reader has reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, ReaderState::Stopped | ReaderState::Failed)
    }
}

/// Line counters of a reader
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines_read: u64,
    pub records_parsed: u64,
    /// Lines that did not parse
    pub lines_discarded: u64,
    /// Parsed records discarded because the queue was full
    pub records_dropped: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    lines_read: AtomicU64,
    records_parsed: AtomicU64,
    lines_discarded: AtomicU64,
    records_dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ReaderState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Move to `state` unless already terminal
    fn advance(&self, state: ReaderState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!ReaderState::from_u8(current).is_terminal()).then_some(state.as_u8())
            });
    }
}

/// Why the read loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadEnd {
    Eof,
    Cancelled,
    Closed,
    Error,
}

/// Runs one logcat child process and feeds parsed records into a queue.
///
/// Once stopped (or failed) a reader can be started again with a new
/// producer. Each run starts from zeroed counters.
pub struct LogStreamReader {
    command: BridgeCommand,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stop_timeout: Duration,
    term_grace: Duration,
}

impl LogStreamReader {
    /// Create an idle reader for `command`
    pub fn new(command: BridgeCommand) -> Self {
        Self {
            command,
            shared: Arc::new(Shared::default()),
            cancel: CancellationToken::new(),
            task: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            term_grace: DEFAULT_TERM_GRACE,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Grace period between SIGTERM and a hard kill. Keep it below the stop
    /// timeout or the task is aborted before the kill.
    pub fn with_term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }

    pub fn command(&self) -> &BridgeCommand {
        &self.command
    }

    pub fn state(&self) -> ReaderState {
        self.shared.state()
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            lines_read: self.shared.lines_read.load(Ordering::Relaxed),
            records_parsed: self.shared.records_parsed.load(Ordering::Relaxed),
            lines_discarded: self.shared.lines_discarded.load(Ordering::Relaxed),
            records_dropped: self.shared.records_dropped.load(Ordering::Relaxed),
        }
    }

    /// Launch the child and start reading.
    ///
    /// Returns without waiting for output. A launch failure ends the stream
    /// right away, so the consumer still observes exactly one end of stream.
    /// Must be called from within a tokio runtime.
    ///
    /// While a run is in progress this does nothing and returns the current
    /// state; `producer` is dropped, which ends its stream.
    pub fn start(&mut self, producer: QueueProducer) -> ReaderState {
        match self.state() {
            ReaderState::Idle => {}
            state if state.is_terminal() => self.reset(),
            state => return state,
        }
        self.shared.set_state(ReaderState::Starting);

        let mut child = match self.command.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %self.command, error = %e, "failed to launch logcat");
                self.shared.set_state(ReaderState::Failed);
                producer.finish();
                return ReaderState::Failed;
            }
        };

        let Some(stdout) = child.stdout.take() else {
            warn!(command = %self.command, "logcat child has no stdout");
            let _ = child.start_kill();
            self.shared.set_state(ReaderState::Failed);
            producer.finish();
            return ReaderState::Failed;
        };

        debug!(command = %self.command, pid = ?child.id(), "logcat started");
        self.shared.set_state(ReaderState::Running);

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let grace = self.term_grace;
        self.task = Some(tokio::spawn(async move {
            // Keep the pipe open until the child is gone so it is not
            // killed by SIGPIPE before it can handle SIGTERM
            let mut stdout = BufReader::new(stdout);
            let end = read_lines(&mut stdout, &producer, &shared, &cancel).await;
            debug!(?end, "logcat read loop finished");

            // Reap the child before signalling end of stream
            terminate(&mut child, grace).await;
            drop(stdout);

            producer.finish();
            shared.set_state(ReaderState::Stopped);
        }));

        ReaderState::Running
    }

    /// Stop reading and terminate the child. Safe to call repeatedly.
    ///
    /// Waits up to the stop timeout for the task, then aborts it. Aborting
    /// drops the producer and the child, so end of stream is still delivered
    /// and the process is still killed.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            self.shared.advance(ReaderState::Stopped);
            return;
        };

        self.shared.advance(ReaderState::Stopping);
        if tokio::time::timeout(self.stop_timeout, &mut task).await.is_err() {
            warn!(timeout = ?self.stop_timeout, "logcat reader did not stop in time, aborting");
            task.abort();
        }
        self.shared.advance(ReaderState::Stopped);
    }

    /// Check if the read task is still alive
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Prepare a finished reader for another run
    fn reset(&mut self) {
        // A task that set its terminal state has nothing left to do
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared = Arc::new(Shared::default());
        self.cancel = CancellationToken::new();
    }
}

impl Drop for LogStreamReader {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Ask the child to exit, kill it if it lingers, and reap it
async fn terminate(child: &mut Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(%status, "logcat exited");
            return;
        }
        Ok(None) => {}
        Err(e) => debug!(error = %e, "failed to poll logcat"),
    }

    if send_sigterm(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "logcat exited after SIGTERM");
                return;
            }
            Ok(Err(e)) => debug!(error = %e, "failed to reap logcat"),
            Err(_) => debug!(?grace, "logcat ignored SIGTERM, killing"),
        }
    }

    let _ = child.start_kill();
    match child.wait().await {
        Ok(status) => debug!(%status, "logcat exited"),
        Err(e) => debug!(error = %e, "failed to reap logcat"),
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, error = %e, "failed to send SIGTERM");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

/// Read lines until EOF, cancellation or a closed queue
async fn read_lines<R>(
    mut reader: R,
    producer: &QueueProducer,
    shared: &Shared,
    cancel: &CancellationToken,
) -> ReadEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;

            _ = cancel.cancelled() => return ReadEnd::Cancelled,

            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => return ReadEnd::Eof,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "error reading logcat output");
                return ReadEnd::Error;
            }
        }
        shared.lines_read.fetch_add(1, Ordering::Relaxed);

        // Invalid UTF-8 is replaced rather than ending the stream
        let line = String::from_utf8_lossy(&buf);
        let line = LogParser::strip_terminators(&line);
        let Some(record) = LogParser::parse(line) else {
            trace!(line, "discarding unparseable line");
            shared.lines_discarded.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        shared.records_parsed.fetch_add(1, Ordering::Relaxed);

        match producer.try_push(Arc::new(record)) {
            PushOutcome::Queued => {}
            PushOutcome::Dropped => {
                shared.records_dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => return ReadEnd::Closed,
        }
    }
}
