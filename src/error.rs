//! Error taxonomy and load diagnostics.
//!
//! Loaders never abort on a single bad entry: they record a [`Diagnostic`]
//! and carry on. Writers and mutations fail fast with [`Error`].

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::models::BouquetId;

/// Errors surfaced by loaders, writers, jobs and the mutation API.
#[derive(Error, Debug)]
pub enum Error {
    /// A single entry could not be parsed. Loaders downgrade this to a diagnostic.
    #[error("{file}:{line}: {reason}")]
    Parse {
        file: String,
        line: usize,
        reason: String,
    },

    /// A whole file was refused (bad XML after sanitising, bad lamedb header).
    #[error("{file}: {reason}")]
    Format { file: String, reason: String },

    /// A mutation was rejected; the model is unchanged.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Unknown file family version, load only.
    #[error("{file}: unsupported version {found}")]
    UnsupportedVersion { file: String, found: String },

    /// The host cancelled a running job.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Format {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejections of cross-reference mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("fav id already present: {0}")]
    DuplicateFavId(String),

    #[error("no such service: {0}")]
    MissingReference(String),

    #[error("alternatives cannot contain {0}")]
    NestedAlternatives(String),

    #[error("no such bouquet: {0}")]
    MissingBouquet(BouquetId),

    /// Removing the member would leave the alternatives group empty.
    #[error("alternatives group {0} would become empty")]
    EmptyAlternatives(String),

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("{0} cannot be stored in these settings")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// One entry dropped or normalised.
    Parse,
    /// Whole file refused, section left empty.
    Format,
    UnsupportedVersion,
    Io,
    /// Input kept verbatim but looks suspicious.
    Notice,
}

/// One collected load problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub file: String,
    pub line: Option<usize>,
    pub reason: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.file, line, self.reason),
            None => write!(f, "{}: {}", self.file, self.reason),
        }
    }
}

/// Diagnostics accumulated over one load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        log::warn!("{}", diagnostic);
        self.items.push(diagnostic);
    }

    pub fn parse(&mut self, file: &str, line: usize, reason: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            kind: DiagnosticKind::Parse,
            file: file.to_string(),
            line: Some(line),
            reason: reason.into(),
        });
    }

    pub fn notice(&mut self, file: &str, line: Option<usize>, reason: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            kind: DiagnosticKind::Notice,
            file: file.to_string(),
            line,
            reason: reason.into(),
        });
    }

    /// Records a file-level error. `Parse` errors keep their line.
    pub fn error(&mut self, err: &Error) {
        let (kind, file, line, reason) = match err {
            Error::Parse { file, line, reason } => {
                (DiagnosticKind::Parse, file.clone(), Some(*line), reason.clone())
            }
            Error::Format { file, reason } => {
                (DiagnosticKind::Format, file.clone(), None, reason.clone())
            }
            Error::UnsupportedVersion { file, found } => (
                DiagnosticKind::UnsupportedVersion,
                file.clone(),
                None,
                format!("unsupported version {}", found),
            ),
            Error::Io { path, source } => (
                DiagnosticKind::Io,
                path.display().to_string(),
                None,
                source.to_string(),
            ),
            other => (DiagnosticKind::Notice, String::new(), None, other.to_string()),
        };
        let severity = if kind == DiagnosticKind::Parse {
            Severity::Warning
        } else {
            Severity::Error
        };
        self.push(Diagnostic {
            severity,
            kind,
            file,
            line,
            reason,
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when a file-level error was recorded; the host must acknowledge before saving.
    pub fn has_blocking(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }
}
