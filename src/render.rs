use std::io::{self, BufWriter, Stdout, Write};
use std::ops::Range;

use catscope_logs::{FilteredView, PipelineObserver, StopCause};
use catscope_types::LogRecord;

/// Prints newly visible records to a writer as threadtime lines.
///
/// Observer methods cannot fail, so the first write error is kept and
/// printing stops until it is taken.
pub struct TerminalRenderer<W: Write = BufWriter<Stdout>> {
    out: W,
    error: Option<io::Error>,
    printed: u64,
}

impl TerminalRenderer {
    /// Render to buffered stdout
    pub fn stdout() -> Self {
        Self::new(BufWriter::new(io::stdout()))
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            error: None,
            printed: 0,
        }
    }

    /// Take the pending write error, if any
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Records printed so far
    pub fn printed(&self) -> u64 {
        self.printed
    }

    #[cfg(test)]
    fn get_ref(&self) -> &W {
        &self.out
    }

    fn write_record(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(
            self.out,
            "{} {:>5} {:>5} {} {}: {}",
            record.timestamp, record.pid, record.tid, record.priority, record.tag, record.message
        )
    }

    fn flush(&mut self) {
        if self.error.is_none() {
            if let Err(e) = self.out.flush() {
                self.error = Some(e);
            }
        }
    }
}

impl<W: Write> PipelineObserver for TerminalRenderer<W> {
    fn rows_inserted(&mut self, view: &FilteredView<'_>, rows: Range<usize>) {
        if self.error.is_some() {
            return;
        }
        for record in view.rows(rows) {
            if let Err(e) = self.write_record(record) {
                self.error = Some(e);
                return;
            }
            self.printed += 1;
        }
    }

    fn data_available(&mut self, _view: &FilteredView<'_>) {
        self.flush();
    }

    fn reader_stopped(&mut self, _cause: StopCause) {
        self.flush();
    }
}
