use std::io::Read;

use derive_setters::Setters;
use tracing::{debug, instrument, warn};

use crate::delimiter::detect;
use crate::splitter::split_line;
use crate::table::Row;

pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Everything the parser reports, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Progress { percent: f64, rows_parsed: usize },
    Header(Row),
    Rows(Vec<Row>),
    Done { rows_parsed: usize },
    Error { message: String },
}

impl Signal {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Signal::Done { .. } | Signal::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Setters)]
#[setters(prefix = "with_")]
pub struct ParserOptions {
    /// File extension, drives delimiter forcing.
    #[setters(into)]
    pub extension: String,
    /// Bytes read per window.
    pub chunk_size: usize,
    /// Data rows per `Rows` signal.
    pub batch_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            extension: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Completed { rows_parsed: usize },
    Failed,
    /// The receiving side asked to stop.
    Stopped,
}

/// Producer side state: delimiter, header flag and the pending batch.
struct LineSink<'a, F> {
    extension: &'a str,
    batch_size: usize,
    delimiter: Option<char>,
    header_sent: bool,
    batch: Vec<Row>,
    rows_parsed: usize,
    emit: F,
}

impl<F: FnMut(Signal) -> bool> LineSink<'_, F> {
    /// Handle one physical line. Returns false once the consumer is gone.
    fn line(&mut self, bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes);
        let line = text.strip_suffix('\r').unwrap_or(&text);
        if line.trim().is_empty() {
            return true;
        }

        let delimiter = *self
            .delimiter
            .get_or_insert_with(|| detect(line, self.extension));
        let fields = split_line(line, delimiter);

        if !self.header_sent {
            debug!("Header with {} columns, delimiter {:?}", fields.len(), delimiter);
            self.header_sent = true;
            return (self.emit)(Signal::Header(fields));
        }

        self.batch.push(fields);
        self.rows_parsed += 1;
        if self.batch.len() >= self.batch_size {
            return self.flush();
        }
        true
    }

    fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        (self.emit)(Signal::Rows(batch))
    }
}

/// Stream `reader` through the line splitter, pushing signals into `emit`.
///
/// `total_bytes` is only used for progress reporting. Lines are reassembled
/// across window boundaries on raw bytes, so the window size never changes
/// the result. A quoted field containing a newline is not reassembled, every
/// physical line is split on its own.
#[instrument(skip_all, fields(extension = %options.extension, total_bytes = total_bytes))]
pub fn parse<R, F>(
    mut reader: R,
    total_bytes: u64,
    options: &ParserOptions,
    emit: F,
) -> ParseOutcome
where
    R: Read,
    F: FnMut(Signal) -> bool,
{
    let chunk_size = options.chunk_size.max(1);
    let batch_size = options.batch_size.max(1);

    let mut sink = LineSink {
        extension: &options.extension,
        batch_size,
        delimiter: None,
        header_sent: false,
        batch: Vec::with_capacity(batch_size),
        rows_parsed: 0,
        emit,
    };

    let mut window: Vec<u8> = Vec::new();
    let mut leftover: Vec<u8> = Vec::new();
    let mut bytes_read: u64 = 0;

    loop {
        window.clear();
        let n = match (&mut reader).take(chunk_size as u64).read_to_end(&mut window) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Reading failed after {bytes_read} bytes: {e}");
                (sink.emit)(Signal::Error {
                    message: e.to_string(),
                });
                return ParseOutcome::Failed;
            }
        };

        let mut pieces = window.split(|&b| b == b'\n').peekable();
        while let Some(piece) = pieces.next() {
            if pieces.peek().is_none() {
                // No newline after this piece yet, defer to the next window.
                leftover.extend_from_slice(piece);
                break;
            }
            let keep_going = if leftover.is_empty() {
                sink.line(piece)
            } else {
                leftover.extend_from_slice(piece);
                let line = std::mem::take(&mut leftover);
                sink.line(&line)
            };
            if !keep_going {
                return ParseOutcome::Stopped;
            }
        }

        bytes_read += n as u64;
        let percent = if total_bytes == 0 {
            100.0
        } else {
            (bytes_read as f64 / total_bytes as f64 * 100.0).min(100.0)
        };
        let rows_parsed = sink.rows_parsed;
        if !(sink.emit)(Signal::Progress {
            percent,
            rows_parsed,
        }) {
            return ParseOutcome::Stopped;
        }
    }

    if !leftover.is_empty() && !sink.line(&leftover) {
        return ParseOutcome::Stopped;
    }
    if !sink.flush() {
        return ParseOutcome::Stopped;
    }

    let rows_parsed = sink.rows_parsed;
    debug!("Parsed {rows_parsed} rows from {bytes_read} bytes");
    if !(sink.emit)(Signal::Done { rows_parsed }) {
        return ParseOutcome::Stopped;
    }
    ParseOutcome::Completed { rows_parsed }
}
