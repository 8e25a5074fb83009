//! Diagnostic records accumulated during parsing and making.
//!
//! Operations report every recoverable anomaly as a [`DiagMessage`] instead of
//! failing; an [`Error`](crate::error::Error) is only raised alongside a
//! Critical or Fatal record when the operation genuinely cannot continue.

use std::fmt::{self, Display, Formatter};
use std::ops::BitOrAssign;
use std::slice::Iter;

/// The severity of a diagnostic message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum DiagLevel {
    Debug,
    Information,
    Warning,
    Critical,
    Fatal,
}

impl DiagLevel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
        }
    }
}

impl Display for DiagLevel {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write![f, "{}", self.name()]
    }
}

/// Joins two levels, keeping the more severe one.
impl BitOrAssign for DiagLevel {
    fn bitor_assign(&mut self, rhs: Self) {
        if *self < rhs {
            *self = rhs;
        }
    }
}

/// A single diagnostic record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagMessage {
    level: DiagLevel,
    message: String,
    context: &'static str,
}

impl DiagMessage {
    pub fn new(level: DiagLevel, message: impl Into<String>, context: &'static str) -> Self {
        Self {
            level,
            message: message.into(),
            context,
        }
    }

    pub fn level(&self) -> DiagLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &'static str {
        self.context
    }
}

impl Display for DiagMessage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write![f, "{}: {} ({})", self.level, self.message, self.context]
    }
}

/// An ordered collection of diagnostic records.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    messages: Vec<DiagMessage>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new record.
    pub fn push(&mut self, level: DiagLevel, message: impl Into<String>, context: &'static str) {
        self.messages.push(DiagMessage::new(level, message, context));
    }

    /// Returns whether any record is at least as severe as `level`.
    pub fn has(&self, level: DiagLevel) -> bool {
        self.messages.iter().any(|msg| msg.level() >= level)
    }

    /// Returns the most severe level present, or `None` for an empty collection.
    pub fn level(&self) -> Option<DiagLevel> {
        let mut worst = None;

        for msg in &self.messages {
            match worst {
                Some(ref mut level) => *level |= msg.level(),
                None => worst = Some(msg.level()),
            }
        }

        worst
    }

    pub fn iter(&self) -> Iter<DiagMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagMessage;
    type IntoIter = Iter<'a, DiagMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_join_keeps_the_worst() {
        let mut level = DiagLevel::Information;
        level |= DiagLevel::Debug;
        assert_eq!(level, DiagLevel::Information);
        level |= DiagLevel::Critical;
        assert_eq!(level, DiagLevel::Critical);
        level |= DiagLevel::Warning;
        assert_eq!(level, DiagLevel::Critical);
    }

    #[test]
    fn collection_level_is_the_maximum() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.level(), None);

        diag.push(DiagLevel::Information, "header found", "test");
        diag.push(DiagLevel::Warning, "unknown child", "test");
        diag.push(DiagLevel::Debug, "trace", "test");

        assert_eq!(diag.level(), Some(DiagLevel::Warning));
        assert!(diag.has(DiagLevel::Warning));
        assert!(!diag.has(DiagLevel::Critical));
        assert_eq!(diag.len(), 3);
    }
}
