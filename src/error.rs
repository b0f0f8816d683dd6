//! Structured diagnostics.
//!
//! Every fallible frontend/interpreter operation returns an [`ErrorMessage`]:
//! one primary location plus an ordered list of secondary locations with
//! explanatory notes (used e.g. to list each rejected overload candidate).
//! Font table decoding is `Option`-based at the leaf and converted into an
//! `ErrorMessage` at the loading phase boundary.

use std::fmt;
use std::rc::Rc;

/// A half-open span inside one source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: Rc<str>,
    /// 0-based.
    pub line: u32,
    /// 0-based.
    pub column: u32,
    /// In bytes.
    pub length: u32,
}

impl Location {
    pub fn new(file: Rc<str>, line: u32, column: u32) -> Self {
        Location {
            file,
            line,
            column,
            length: 1,
        }
    }

    /// A location for declarations that have no source text (builtins).
    pub fn builtin() -> Self {
        Location {
            file: Rc::from("<builtin>"),
            line: 0,
            column: 0,
            length: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1-based for humans.
        write!(f, "{}:{}:{}", self.file, self.line + 1, self.column + 1)
    }
}

/// A secondary note attached to an [`ErrorMessage`].
#[derive(Clone, Debug)]
pub struct ErrorInfo {
    pub location: Location,
    pub message: String,
}

/// A diagnostic with a primary location and ordered secondary notes.
#[derive(Clone, Debug)]
pub struct ErrorMessage {
    pub location: Location,
    pub message: String,
    pub infos: Vec<ErrorInfo>,
}

impl ErrorMessage {
    pub fn new(location: Location, message: impl Into<String>) -> Self {
        ErrorMessage {
            location,
            message: message.into(),
            infos: Vec::new(),
        }
    }

    pub fn with_info(mut self, location: Location, message: impl Into<String>) -> Self {
        self.infos.push(ErrorInfo {
            location,
            message: message.into(),
        });
        self
    }

    /// Renders the caret-and-column view for one location against its
    /// source text. The driver resolves file contents.
    pub fn render_snippet(location: &Location, source: &str) -> String {
        let line_text = source
            .lines()
            .nth(location.line as usize)
            .unwrap_or_default();
        let line_no = location.line + 1;
        let gutter = line_no.to_string().len();
        let carets = "^".repeat((location.length.max(1)) as usize);
        format!(
            "{:gutter$} |\n{} | {}\n{:gutter$} | {:col$}{}",
            "",
            line_no,
            line_text,
            "",
            "",
            carets,
            gutter = gutter,
            col = location.column as usize,
        )
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl std::error::Error for ErrorMessage {}

/// Shorthand for building an [`ErrorMessage`] result.
#[macro_export]
macro_rules! err {
    ($loc:expr, $($fmt:tt)*) => {
        return Err($crate::error::ErrorMessage::new($loc.clone(), format!($($fmt)*)))
    };
}

/// Errors surfaced by the outer driver.
#[derive(Debug, thiserror::Error)]
pub enum SapError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Diagnostic(#[from] ErrorMessage),

    #[error("malformed font: {0}")]
    MalformedFont(&'static str),

    #[error("no matching font for '{0}'")]
    FontNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_points_at_column() {
        let src = "let x = ;\n";
        let loc = Location {
            file: Rc::from("test.sap"),
            line: 0,
            column: 8,
            length: 1,
        };
        let snippet = ErrorMessage::render_snippet(&loc, src);
        let caret_line = snippet.lines().last().unwrap();
        assert!(caret_line.ends_with("        ^"));
    }

    #[test]
    fn infos_keep_order() {
        let loc = Location::builtin();
        let msg = ErrorMessage::new(loc.clone(), "no matching overload")
            .with_info(loc.clone(), "candidate 1 rejected")
            .with_info(loc, "candidate 2 rejected");
        assert_eq!(msg.infos.len(), 2);
        assert!(msg.infos[0].message.contains("candidate 1"));
    }
}
