use std::path::Path;

use crate::domain::DVError;

/// Candidates tried when the extension does not force a delimiter.
/// Order matters: ties go to the earlier entry.
pub const CANDIDATES: [char; 4] = ['\t', ',', ';', '|'];

pub const DEFAULT_DELIMITER: char = '\t';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    TSV,
    CSV,
    PSV,
    TXT,
}

impl FileFormat {
    pub fn from_extension(extension: &str) -> Result<Self, DVError> {
        match extension.to_ascii_lowercase().as_str() {
            "tsv" => Ok(FileFormat::TSV),
            "csv" => Ok(FileFormat::CSV),
            "psv" => Ok(FileFormat::PSV),
            "txt" => Ok(FileFormat::TXT),
            other => Err(DVError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, DVError> {
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        Self::from_extension(extension)
    }

    /// Delimiter implied by the format, if any. Plain text has to be sniffed.
    pub fn forced_delimiter(&self) -> Option<char> {
        match self {
            FileFormat::TSV => Some('\t'),
            FileFormat::CSV => Some(','),
            FileFormat::PSV => Some('|'),
            FileFormat::TXT => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::TSV => "tsv",
            FileFormat::CSV => "csv",
            FileFormat::PSV => "psv",
            FileFormat::TXT => "txt",
        }
    }
}

/// Pick the field separator for a file.
///
/// A known extension wins without looking at the content. Otherwise the
/// candidate occurring most often in `sample` is used. Counting is a plain
/// substring count, quotes are not taken into account.
pub fn detect(sample: &str, extension: &str) -> char {
    if let Some(forced) = FileFormat::from_extension(extension)
        .ok()
        .and_then(|f| f.forced_delimiter())
    {
        return forced;
    }

    let mut best = DEFAULT_DELIMITER;
    let mut best_count = 0;
    for candidate in CANDIDATES {
        let count = sample.matches(candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_forces_delimiter() {
        assert_eq!(detect("a,b,c", "tsv"), '\t');
        assert_eq!(detect("a\tb\tc", "csv"), ',');
        assert_eq!(detect("a,b,c", "PSV"), '|');
    }

    #[test]
    fn most_frequent_candidate_wins() {
        // tab=0, comma=3, semicolon=1, pipe=0
        assert_eq!(detect("a,b,c;d,e", "txt"), ',');
        assert_eq!(detect("a;b;c|d", ""), ';');
        assert_eq!(detect("a|b|c", "txt"), '|');
    }

    #[test]
    fn ties_go_to_first_candidate() {
        assert_eq!(detect("a\tb,c", "txt"), '\t');
        assert_eq!(detect("a;b|c", "txt"), ';');
    }

    #[test]
    fn no_candidates_defaults_to_tab() {
        assert_eq!(detect("plain words only", "txt"), '\t');
        assert_eq!(detect("", "txt"), '\t');
    }

    #[test]
    fn counting_ignores_quotes() {
        assert_eq!(detect("\"a;b;c\",d", "txt"), ';');
    }

    #[test]
    fn detection_is_stable() {
        let sample = "x;y,z,w";
        let first = detect(sample, "txt");
        for _ in 0..10 {
            assert_eq!(detect(sample, "txt"), first);
        }
    }

    #[test]
    fn file_format_from_path() {
        assert_eq!(
            FileFormat::from_path(Path::new("data/Export.TSV")).unwrap(),
            FileFormat::TSV
        );
        assert_eq!(
            FileFormat::from_path(Path::new("notes.txt")).unwrap(),
            FileFormat::TXT
        );
        assert!(matches!(
            FileFormat::from_path(Path::new("sheet.xlsx")),
            Err(DVError::UnsupportedFormat(ext)) if ext == "xlsx"
        ));
        assert!(matches!(
            FileFormat::from_path(Path::new("no_extension")),
            Err(DVError::UnsupportedFormat(_))
        ));
    }
}
