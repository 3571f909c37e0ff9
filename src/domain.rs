use std::fmt;
use std::io::Error;
use std::path::PathBuf;

use ratatui::crossterm::event::KeyEvent;

pub const HELP_TEXT: &str = "\
delview - browse large delimited files

  o            open a file
  n            new file (reset)
  r            retry after an error
  /            search all columns
  f            filter the selected column
  F            clear filter of the selected column
  x            clear search and all filters
  c            choose visible columns
  < >          narrow / widen the selected column
  Enter        show the selected record
  y / Y        copy cell / row
  arrows hjkl  move
  PgUp PgDn    page up / down
  g G          first / last row
  0 $          first / last column
  ?            this help
  Esc          close / back
  q            quit
";

#[derive(Debug)]
pub enum DVError {
    IoError(Error),
    UnsupportedFormat(String),
    EmptyOrHeaderless,
    ParseFailure(String),
    WorkerFailure(String),
    FileNotFound(PathBuf),
    PermissionDenied(PathBuf),
    LoadingFailed(String),
    Config(String),
}

impl fmt::Display for DVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DVError::IoError(e) => write!(f, "I/O error: {e}"),
            DVError::UnsupportedFormat(ext) => write!(
                f,
                "Unsupported file type \"{ext}\": please select a .tsv, .csv, .txt or .psv file"
            ),
            DVError::EmptyOrHeaderless => write!(f, "The file does not contain any data"),
            DVError::ParseFailure(msg) => write!(f, "Failed to parse file: {msg}"),
            DVError::WorkerFailure(msg) => write!(f, "The parser stopped unexpectedly: {msg}"),
            DVError::FileNotFound(path) => write!(f, "File not found: {}", path.display()),
            DVError::PermissionDenied(path) => {
                write!(f, "Permission denied: {}", path.display())
            }
            DVError::LoadingFailed(msg) => write!(f, "Loading failed: {msg}"),
            DVError::Config(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for DVError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DVError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for DVError {
    fn from(err: Error) -> Self {
        DVError::IoError(err)
    }
}

impl From<toml::de::Error> for DVError {
    fn from(err: toml::de::Error) -> Self {
        DVError::Config(err.to_string())
    }
}

/// Which prompt the command line is collecting input for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CMDMode {
    OpenFile,
    SearchTable,
    FilterColumn,
}

impl CMDMode {
    pub fn prompt(&self) -> &'static str {
        match self {
            CMDMode::OpenFile => "open: ",
            CMDMode::SearchTable => "/",
            CMDMode::FilterColumn => "filter: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    MoveToFirstColumn,
    MoveToLastColumn,
    Resize(usize, usize),
    Enter,
    Exit,
    Help,
    OpenFile,
    NewFile,
    Retry,
    Search,
    FilterColumn,
    ClearColumnFilter,
    ClearAllFilters,
    ColumnPicker,
    ToggleColumn,
    ToggleAllColumns,
    WidenColumn,
    NarrowColumn,
    CopyCell,
    CopyRow,
    RawKey(KeyEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_names_the_extension() {
        let msg = DVError::UnsupportedFormat("xlsx".into()).to_string();
        assert!(msg.contains("xlsx"));
        assert!(msg.contains(".tsv"));
    }

    #[test]
    fn io_errors_convert() {
        let err: DVError = Error::other("boom").into();
        assert!(matches!(err, DVError::IoError(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
