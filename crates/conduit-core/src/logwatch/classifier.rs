//! Error signature classification and block assembly
//!
//! Each line is matched top-down against a fixed table; the first matching row
//! decides the kind. Specific signatures come before the generic
//! fatal/uncaught rows so that `Fatal error: Uncaught Error: Call to undefined
//! method` is reported as an undefined method rather than a bare fatal error.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// How serious a classified event is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognised error signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SyntaxError,
    UndefinedClass,
    UndefinedMethod,
    DuplicateMethod,
    UncaughtException,
    FatalError,
    CriticalLog,
    GenericError,
    UndefinedVariable,
    Warning,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "syntax_error",
            Self::UndefinedClass => "undefined_class",
            Self::UndefinedMethod => "undefined_method",
            Self::DuplicateMethod => "duplicate_method",
            Self::UncaughtException => "uncaught_exception",
            Self::FatalError => "fatal_error",
            Self::CriticalLog => "critical_log",
            Self::GenericError => "generic_error",
            Self::UndefinedVariable => "undefined_variable",
            Self::Warning => "warning",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::SyntaxError | Self::FatalError | Self::CriticalLog => Severity::Critical,
            Self::UndefinedClass
            | Self::UndefinedMethod
            | Self::DuplicateMethod
            | Self::UncaughtException
            | Self::GenericError => Severity::Error,
            Self::Warning => Severity::Warning,
            Self::UndefinedVariable => Severity::Notice,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("classifier pattern must compile")
}

static PATTERNS: LazyLock<Vec<(ErrorKind, Regex)>> = LazyLock::new(|| {
    vec![
        (
            ErrorKind::SyntaxError,
            pattern(r"(?i)\b(?:parse|syntax) error\b|\bParseError\b"),
        ),
        (
            ErrorKind::UndefinedClass,
            pattern(r#"(?i)\bclass ["']?[\w\\]+["']? not found"#),
        ),
        (
            ErrorKind::UndefinedMethod,
            pattern(r"(?i)\bcall to (?:an )?undefined (?:method|function)\b"),
        ),
        (ErrorKind::DuplicateMethod, pattern(r"(?i)\bcannot redeclare\b")),
        (ErrorKind::UncaughtException, pattern(r"(?i)\buncaught\b")),
        (ErrorKind::FatalError, pattern(r"(?i)\bfatal error\b")),
        (
            ErrorKind::CriticalLog,
            pattern(r"(?i)\.(?:critical|emergency|alert):|\[(?:crit|critical|emerg|emergency|alert)\]"),
        ),
        (
            ErrorKind::GenericError,
            pattern(r"(?i)\.error:|\[error\]|\berror:"),
        ),
        (
            ErrorKind::UndefinedVariable,
            pattern(r"(?i)\bundefined (?:variable|index|array key|offset)\b"),
        ),
        (
            ErrorKind::Warning,
            pattern(r"(?i)\.warning:|\[warn(?:ing)?\]|\bwarning:"),
        ),
    ]
});

static FRAME_MARKER: LazyLock<Regex> = LazyLock::new(|| pattern(r"^#\d+\s"));
static NEXT_EXCEPTION: LazyLock<Regex> = LazyLock::new(|| pattern(r"^Next [\w\\]+"));
// Laravel closes the JSON context of an exception log entry with `"}`
static CONTEXT_SECTION: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\[(stacktrace|previous exception)\]"));
static CONTEXT_CLOSE: LazyLock<Regex> = LazyLock::new(|| pattern(r#"^"\}\s*$"#));
static LOCATION: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(?:in|at) (\S+?)(?: on line |:)(\d+)\b"));
static LEADING_STAMP: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\s*\[[^\]]*\]\s*"));

/// Match a single line against the pattern table
pub fn classify(line: &str) -> Option<ErrorKind> {
    PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(kind, _)| *kind)
}

/// Whether `line` continues the block opened by a previous line
pub fn is_continuation(line: &str) -> bool {
    if line.starts_with(' ') || line.starts_with('\t') {
        return !line.trim().is_empty();
    }
    FRAME_MARKER.is_match(line)
        || NEXT_EXCEPTION.is_match(line)
        || CONTEXT_SECTION.is_match(line)
        || CONTEXT_CLOSE.is_match(line)
        || line.starts_with("Stack trace:")
        || line.contains("thrown in ")
}

/// File and line an error points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

fn find_location<'a>(lines: impl IntoIterator<Item = &'a String>) -> Option<SourceLocation> {
    lines.into_iter().find_map(|l| {
        let caps = LOCATION.captures(l)?;
        Some(SourceLocation {
            file: caps.get(1)?.as_str().to_string(),
            line: caps.get(2)?.as_str().parse().ok()?,
        })
    })
}

/// First line without its leading bracketed timestamp
pub fn normalize_first_line(line: &str) -> &str {
    let stripped = match LEADING_STAMP.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    };
    stripped.trim()
}

/// Identity of an error for debouncing: kind plus normalised first line
pub fn fingerprint(kind: ErrorKind, first_line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_first_line(first_line).as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// A classified error block
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Normalised first line
    pub message: String,
    /// First line plus captured continuation lines
    pub block: Vec<String>,
    /// Continuation lines dropped past the block limit
    pub truncated_lines: usize,
    pub location: Option<SourceLocation>,
    pub fingerprint: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
struct OpenBlock {
    kind: ErrorKind,
    lines: Vec<String>,
    truncated: usize,
}

impl OpenBlock {
    fn finish(self) -> ErrorEvent {
        let first = self.lines.first().map(String::as_str).unwrap_or_default();
        ErrorEvent {
            kind: self.kind,
            severity: self.kind.severity(),
            message: normalize_first_line(first).to_string(),
            fingerprint: fingerprint(self.kind, first),
            location: find_location(&self.lines),
            truncated_lines: self.truncated,
            detected_at: Utc::now(),
            block: self.lines,
        }
    }
}

/// Groups classified lines with their stack-trace continuation
///
/// Lines must be fed in file order. Lines that neither match the table nor
/// continue an open block are dropped.
#[derive(Debug)]
pub struct BlockAssembler {
    max_lines: usize,
    open: Option<OpenBlock>,
}

impl BlockAssembler {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            open: None,
        }
    }

    /// Feed one line; returns a block completed by this line, if any
    pub fn push(&mut self, line: &str) -> Option<ErrorEvent> {
        if let Some(block) = self.open.as_mut() {
            if is_continuation(line) {
                if block.lines.len() < self.max_lines {
                    block.lines.push(line.to_string());
                } else {
                    block.truncated += 1;
                }
                return None;
            }
        }

        let finished = self.flush();
        if let Some(kind) = classify(line) {
            self.open = Some(OpenBlock {
                kind,
                lines: vec![line.to_string()],
                truncated: 0,
            });
        }
        finished
    }

    /// Close the open block
    pub fn flush(&mut self) -> Option<ErrorEvent> {
        self.open.take().map(OpenBlock::finish)
    }

    pub fn has_open_block(&self) -> bool {
        self.open.is_some()
    }
}
