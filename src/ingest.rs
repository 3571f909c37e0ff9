use std::any::Any;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};
use tracing_error::SpanTrace;

use crate::delimiter::FileFormat;
use crate::domain::DVError;
use crate::stream::{self, ParseOutcome, ParserOptions, Signal};
use crate::table::{Table, TableBuilder};

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub format: FileFormat,
}

impl FileInfo {
    pub fn from_path(path: PathBuf) -> Result<Self, DVError> {
        let format = FileFormat::from_path(&path)?;
        let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DVError::FileNotFound(path.clone()),
            ErrorKind::PermissionDenied => DVError::PermissionDenied(path.clone()),
            _ => DVError::IoError(e),
        })?;
        if !metadata.is_file() {
            return Err(DVError::LoadingFailed(format!(
                "{} is not a file",
                path.display()
            )));
        }
        Ok(FileInfo {
            path,
            file_size: metadata.len(),
            format,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string()
    }
}

/// What travels from the parser thread to the session.
#[derive(Debug)]
enum WorkerEvent {
    Signal(Signal),
    Crashed(String),
}

#[derive(Debug)]
pub enum IngestUpdate {
    Progress { percent: f64, rows_parsed: usize },
    Loaded(Table),
    Failed(DVError),
}

impl IngestUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestUpdate::Progress { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    pub file_name: String,
    pub percent: f64,
    pub rows_parsed: usize,
}

struct ActiveParse {
    rx: mpsc::Receiver<WorkerEvent>,
    cancel: Arc<AtomicBool>,
    builder: TableBuilder,
    progress: LoadProgress,
    started: Instant,
}

/// Owns at most one running parse.
///
/// Starting a new file cancels the running worker and drops its receiver, so
/// anything the old thread still sends is lost instead of being applied.
pub struct IngestSession {
    options: ParserOptions,
    active: Option<ActiveParse>,
}

impl IngestSession {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn progress(&self) -> Option<&LoadProgress> {
        self.active.as_ref().map(|a| &a.progress)
    }

    /// Validate `path` and spawn a parser thread for it.
    ///
    /// Unsupported extensions and missing files are rejected here, before
    /// any thread exists.
    pub fn start(&mut self, path: PathBuf) -> Result<(), DVError> {
        self.cancel();

        let file_info = FileInfo::from_path(path)?;
        let options = self
            .options
            .clone()
            .with_extension(file_info.format.extension());

        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let progress = LoadProgress {
            file_name: file_info.file_name(),
            percent: 0.0,
            rows_parsed: 0,
        };
        let builder = TableBuilder::new(file_info.path.clone());

        let worker_cancel = Arc::clone(&cancel);
        std::thread::Builder::new()
            .name("delview-parser".to_string())
            .spawn(move || {
                let crash_tx = tx.clone();
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_parse(&file_info, &options, &tx, &worker_cancel)
                }));
                if let Err(payload) = result {
                    let msg = panic_message(payload.as_ref());
                    error!("Parser thread panicked: {msg}\n{}", SpanTrace::capture());
                    let _ = crash_tx.send(WorkerEvent::Crashed(msg));
                }
            })?;

        info!("Started parsing {}", progress.file_name);
        self.active = Some(ActiveParse {
            rx,
            cancel,
            builder,
            progress,
            started: Instant::now(),
        });
        Ok(())
    }

    /// Tear down the running parse, discarding everything received so far.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.store(true, Ordering::SeqCst);
            info!(
                "Cancelled parsing {} after {} rows",
                active.progress.file_name,
                active.builder.rows_received()
            );
        }
    }

    /// Drain at most `max` worker events without blocking.
    ///
    /// Rows are buffered internally; a table is only handed out once the
    /// worker reports `Done`. After a terminal update the session is idle.
    pub fn poll(&mut self, max: usize) -> Vec<IngestUpdate> {
        let mut updates = Vec::new();
        let Some(active) = self.active.as_mut() else {
            return updates;
        };

        let mut handled = 0;
        let mut finished: Option<Result<usize, DVError>> = None;
        while handled < max {
            let event = match active.rx.try_recv() {
                Ok(event) => event,
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    finished = Some(Err(DVError::WorkerFailure(
                        "parser exited before finishing".to_string(),
                    )));
                    break;
                }
            };
            handled += 1;

            match event {
                WorkerEvent::Signal(Signal::Progress {
                    percent,
                    rows_parsed,
                }) => {
                    active.progress.percent = percent;
                    active.progress.rows_parsed = rows_parsed;
                    updates.push(IngestUpdate::Progress {
                        percent,
                        rows_parsed,
                    });
                }
                WorkerEvent::Signal(Signal::Header(header)) => {
                    trace!("Received header {:?}", header);
                    active.builder.set_header(header);
                }
                WorkerEvent::Signal(Signal::Rows(batch)) => {
                    active.builder.append(batch);
                }
                WorkerEvent::Signal(Signal::Done { rows_parsed }) => {
                    finished = Some(Ok(rows_parsed));
                    break;
                }
                WorkerEvent::Signal(Signal::Error { message }) => {
                    finished = Some(Err(DVError::ParseFailure(message)));
                    break;
                }
                WorkerEvent::Crashed(msg) => {
                    finished = Some(Err(DVError::WorkerFailure(msg)));
                    break;
                }
            }
        }

        if let Some(result) = finished
            && let Some(active) = self.active.take()
        {
            updates.push(Self::complete(active, result));
        }
        updates
    }

    /// Block until the running parse finishes or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Option<IngestUpdate> {
        let deadline = Instant::now() + timeout;
        while self.is_active() {
            if let Some(update) = self.poll(usize::MAX).into_iter().find(|u| u.is_terminal()) {
                return Some(update);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    }

    fn complete(active: ActiveParse, result: Result<usize, DVError>) -> IngestUpdate {
        let elapsed = active.started.elapsed().as_millis();
        let name = active.progress.file_name;
        match result.and_then(|rows_parsed| {
            if rows_parsed != active.builder.rows_received() {
                warn!(
                    "Parser reported {rows_parsed} rows but {} arrived",
                    active.builder.rows_received()
                );
            }
            active.builder.finish()
        }) {
            Ok(table) => {
                info!(
                    "Loaded {name}: {} columns, {} rows in {elapsed}ms",
                    table.column_count(),
                    table.row_count()
                );
                IngestUpdate::Loaded(table)
            }
            Err(e) => {
                warn!("Loading {name} failed after {elapsed}ms: {e}");
                IngestUpdate::Failed(e)
            }
        }
    }
}

impl Drop for IngestSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_parse(
    file_info: &FileInfo,
    options: &ParserOptions,
    tx: &mpsc::Sender<WorkerEvent>,
    cancel: &AtomicBool,
) {
    let file = match File::open(&file_info.path) {
        Ok(file) => file,
        Err(e) => {
            let _ = tx.send(WorkerEvent::Signal(Signal::Error {
                message: format!("{}: {e}", file_info.path.display()),
            }));
            return;
        }
    };

    let outcome = stream::parse(file, file_info.file_size, options, |signal| {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        tx.send(WorkerEvent::Signal(signal)).is_ok()
    });
    match outcome {
        ParseOutcome::Stopped => debug!(
            "Parser for {} was abandoned by the session",
            display_name(&file_info.path)
        ),
        _ => debug!("Parser for {} finished: {:?}", display_name(&file_info.path), outcome),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn session() -> IngestSession {
        IngestSession::new(ParserOptions::default().with_chunk_size(7).with_batch_size(2))
    }

    #[test]
    fn loads_tsv_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people.tsv", b"id\tname\n1\tAlice\n2\tBob");

        let mut ingest = session();
        ingest.start(path).unwrap();
        assert!(ingest.is_active());
        match ingest.wait(TIMEOUT) {
            Some(IngestUpdate::Loaded(table)) => {
                assert_eq!(table.header(), &["id", "name"]);
                assert_eq!(table.row_count(), 2);
                assert_eq!(table.cell(0, 1), "Alice");
                assert_eq!(table.cell(1, 1), "Bob");
                assert_eq!(table.name(), "people.tsv");
            }
            other => panic!("unexpected update {other:?}"),
        }
        assert!(!ingest.is_active());
    }

    #[test]
    fn rejects_unsupported_extension_before_starting() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "sheet.xlsx", b"a,b\n");

        let mut ingest = session();
        let err = ingest.start(path).unwrap_err();
        assert!(matches!(err, DVError::UnsupportedFormat(ext) if ext == "xlsx"));
        assert!(!ingest.is_active());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut ingest = session();
        let err = ingest.start(dir.path().join("gone.csv")).unwrap_err();
        assert!(matches!(err, DVError::FileNotFound(_)));
    }

    #[test]
    fn empty_file_has_no_header() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "blank.csv", b"\n\n  \n");

        let mut ingest = session();
        ingest.start(path).unwrap();
        assert!(matches!(
            ingest.wait(TIMEOUT),
            Some(IngestUpdate::Failed(DVError::EmptyOrHeaderless))
        ));
    }

    #[test]
    fn progress_is_tracked() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "nums.csv", b"n\n1\n2\n3\n4\n5\n6\n7\n8\n9\n");

        let mut ingest = session();
        ingest.start(path).unwrap();
        assert_eq!(ingest.progress().map(|p| p.file_name.as_str()), Some("nums.csv"));

        let deadline = Instant::now() + TIMEOUT;
        let mut updates = Vec::new();
        while ingest.is_active() && Instant::now() < deadline {
            updates.extend(ingest.poll(1));
        }
        assert!(updates.iter().any(|u| matches!(u, IngestUpdate::Progress { .. })));
        match updates.last() {
            Some(IngestUpdate::Loaded(table)) => assert_eq!(table.row_count(), 9),
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn starting_again_replaces_the_running_parse() {
        let dir = TempDir::new().unwrap();
        let mut big = String::from("a,b\n");
        for i in 0..20_000 {
            big.push_str(&format!("{i},first\n"));
        }
        let first = write_file(&dir, "first.csv", big.as_bytes());
        let second = write_file(&dir, "second.psv", b"x|y\n1|second\n");

        let mut ingest = session();
        ingest.start(first).unwrap();
        ingest.start(second).unwrap();
        match ingest.wait(TIMEOUT) {
            Some(IngestUpdate::Loaded(table)) => {
                assert_eq!(table.header(), &["x", "y"]);
                assert_eq!(table.row_count(), 1);
                assert_eq!(table.cell(0, 1), "second");
            }
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn cancel_discards_everything() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.txt", b"a;b\n1;2\n");

        let mut ingest = session();
        ingest.start(path).unwrap();
        ingest.cancel();
        assert!(!ingest.is_active());
        assert!(ingest.poll(100).is_empty());
        assert!(ingest.wait(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    /// A session wired to a hand-held channel instead of a parser thread.
    fn session_with_sender() -> (IngestSession, mpsc::Sender<WorkerEvent>) {
        let (tx, rx) = mpsc::channel();
        let mut ingest = session();
        ingest.active = Some(ActiveParse {
            rx,
            cancel: Arc::new(AtomicBool::new(false)),
            builder: TableBuilder::new(PathBuf::from("broken.csv")),
            progress: LoadProgress {
                file_name: "broken.csv".to_string(),
                percent: 0.0,
                rows_parsed: 0,
            },
            started: Instant::now(),
        });
        (ingest, tx)
    }

    #[test]
    fn worker_vanishing_before_done_is_a_worker_failure() {
        let (mut ingest, tx) = session_with_sender();
        tx.send(WorkerEvent::Signal(Signal::Header(vec!["a".into(), "b".into()])))
            .unwrap();
        tx.send(WorkerEvent::Signal(Signal::Rows(vec![vec!["1".into(), "2".into()]])))
            .unwrap();
        drop(tx);

        let updates = ingest.poll(100);
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            updates[0],
            IngestUpdate::Failed(DVError::WorkerFailure(_))
        ));
        assert!(!updates.iter().any(|u| matches!(u, IngestUpdate::Loaded(_))));
        assert!(!ingest.is_active());
    }

    #[test]
    fn crashed_worker_is_a_worker_failure() {
        let (mut ingest, tx) = session_with_sender();
        tx.send(WorkerEvent::Signal(Signal::Header(vec!["a".into()])))
            .unwrap();
        tx.send(WorkerEvent::Crashed("index out of bounds".to_string()))
            .unwrap();

        let updates = ingest.poll(100);
        match updates.as_slice() {
            [IngestUpdate::Failed(DVError::WorkerFailure(msg))] => {
                assert_eq!(msg, "index out of bounds")
            }
            other => panic!("unexpected updates {other:?}"),
        }
        assert!(!ingest.is_active());
    }

    #[test]
    fn parse_error_stays_a_parse_failure() {
        let (mut ingest, tx) = session_with_sender();
        tx.send(WorkerEvent::Signal(Signal::Error {
            message: "read failed".to_string(),
        }))
        .unwrap();

        let updates = ingest.poll(100);
        assert!(matches!(
            updates.as_slice(),
            [IngestUpdate::Failed(DVError::ParseFailure(_))]
        ));
    }
}
