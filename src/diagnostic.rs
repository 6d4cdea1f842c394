//! Recoverable diagnostics raised while formatting.
//!
//! Warnings and errors never stop processing. They are logged through the `log`
//! facade and forwarded to an optional embedder-provided sink.

use core::fmt;
use std::sync::{Arc, Mutex};

/// How serious a recoverable diagnostic is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The operation proceeded with a best-effort fallback.
    Warning,
    /// The specific operation was abandoned; processing continues.
    Error,
}

/// Recoverable condition reported by the formatting core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// Justification was requested but the line has no stretchable space.
    CannotAdjustLine { width: i32, target: i32 },
    /// No breakpoint fits; the line is emitted overlength.
    CannotBreakLine { width: i32, target: i32 },
    /// A width or position computation saturated instead of wrapping.
    Saturated { quantity: &'static str },
    /// The metrics database has no glyph for this character.
    MissingGlyph { ch: char },
    /// A font selection named a font the metrics database does not know.
    InvalidFont { font: u16 },
    /// A field was started with no tab stop ahead to bound it.
    ZeroFieldWidth,
    /// A diversion was closed while none was open.
    DiversionStackUnderflow,
    /// An environment was popped while the stack was empty.
    EnvironmentStackUnderflow,
    /// A diversion trap was set while output was not being diverted.
    DiversionTrapWithoutDiversion,
    /// A diversion was still open at shutdown and has been closed.
    UnclosedDiversionAtExit { name: String },
    /// A trap was not sprung because trap callbacks nested too deeply.
    TrapRecursionLimit { name: String, depth: usize },
    /// A page ejection was requested while diverting; only the break happened.
    PageEjectInDiversion,
    /// Page ejection kept springing traps without reaching a new page.
    PageEjectLimit { iterations: usize },
    /// The top-of-page transition can only be undone at the top of a started page.
    PageTransitionNotUndone,
    /// A captured macro was requested but has never been defined.
    UndefinedMacro { name: String },
    /// A hyphenation pattern or exception was malformed and has been skipped.
    MalformedPattern { token: String, reason: &'static str },
    /// A pattern file used a command the loader does not understand.
    UnknownPatternCommand { command: String },
}

impl Diagnostic {
    /// Severity class of this diagnostic.
    pub fn severity(&self) -> Severity {
        match self {
            Self::DiversionStackUnderflow
            | Self::EnvironmentStackUnderflow
            | Self::DiversionTrapWithoutDiversion
            | Self::UnclosedDiversionAtExit { .. }
            | Self::TrapRecursionLimit { .. }
            | Self::UndefinedMacro { .. }
            | Self::ZeroFieldWidth => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CannotAdjustLine { width, target } => write!(
                f,
                "cannot adjust line (width={} target={})",
                width, target
            ),
            Self::CannotBreakLine { width, target } => {
                write!(f, "cannot break line (width={} target={})", width, target)
            }
            Self::Saturated { quantity } => write!(f, "numeric overflow in {}", quantity),
            Self::MissingGlyph { ch } => write!(f, "no glyph for character {:?}", ch),
            Self::InvalidFont { font } => write!(f, "invalid font {}", font),
            Self::ZeroFieldWidth => write!(f, "zero field width"),
            Self::DiversionStackUnderflow => write!(f, "diversion stack underflow"),
            Self::EnvironmentStackUnderflow => write!(f, "environment stack underflow"),
            Self::DiversionTrapWithoutDiversion => {
                write!(f, "cannot set diversion trap when not diverting")
            }
            Self::UnclosedDiversionAtExit { name } => {
                write!(f, "diversion '{}' still open at exit", name)
            }
            Self::TrapRecursionLimit { name, depth } => write!(
                f,
                "trap '{}' not sprung: trap nesting depth {} exceeded",
                name, depth
            ),
            Self::PageEjectInDiversion => write!(f, "page ejection ignored inside diversion"),
            Self::PageEjectLimit { iterations } => write!(
                f,
                "page ejection did not reach a new page after {} attempts",
                iterations
            ),
            Self::PageTransitionNotUndone => {
                write!(f, "top-of-page transition can only be undone at page top")
            }
            Self::UndefinedMacro { name } => write!(f, "macro '{}' not defined", name),
            Self::MalformedPattern { token, reason } => {
                write!(f, "skipping hyphenation entry '{}': {}", token, reason)
            }
            Self::UnknownPatternCommand { command } => {
                write!(f, "unknown pattern file command '{}'", command)
            }
        }
    }
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(Diagnostic) + Send + 'static>>>;

/// Diagnostic dispatcher shared by the formatting core.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<DiagnosticCallback>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Diagnostics {
    /// Dispatcher that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the diagnostics sink.
    pub fn set_sink<F>(&mut self, sink: F)
    where
        F: FnMut(Diagnostic) + Send + 'static,
    {
        self.sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    /// Log a diagnostic at its severity and forward it to the sink.
    pub fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => log::warn!("{}", diagnostic),
            Severity::Error => log::error!("{}", diagnostic),
        }
        let Some(sink) = &self.sink else {
            return;
        };
        if let Ok(mut sink) = sink.lock() {
            sink(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_receives_emitted_diagnostics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let mut diagnostics = Diagnostics::new();
        diagnostics.set_sink(move |d| captured.lock().unwrap().push(d));

        diagnostics.emit(Diagnostic::DiversionStackUnderflow);
        diagnostics.emit(Diagnostic::Saturated { quantity: "width" });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].severity(), Severity::Error);
        assert_eq!(seen[1].severity(), Severity::Warning);
    }

    #[test]
    fn display_names_the_diversion() {
        let d = Diagnostic::UnclosedDiversionAtExit {
            name: "xx".to_string(),
        };
        assert_eq!(d.to_string(), "diversion 'xx' still open at exit");
    }
}
