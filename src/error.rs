use core::fmt;

/// Unrecoverable formatting outcome.
///
/// Returned through every operation that can move vertically or fire a trap, so a
/// trap callback can propagate it with `?` back to the outermost caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// A vertical advance would exceed the largest representable position.
    DiversionOverflow {
        /// Name of the diversion (empty for the top-level page).
        diversion: String,
        /// Position before the advance.
        position: i32,
        /// Requested advance.
        increment: i32,
    },
    /// The configured default font is not known to the metrics database.
    InvalidDefaultFont { font: u16 },
    /// Shutdown reached a point where processing must stop.
    ///
    /// This is a controlled exit, not a failure; the session's `finish` consumes it.
    Exit,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiversionOverflow {
                diversion,
                position,
                increment,
            } => {
                let name = if diversion.is_empty() {
                    "top-level"
                } else {
                    diversion.as_str()
                };
                write!(
                    f,
                    "diversion overflow in {} (position={} increment={})",
                    name, position, increment
                )
            }
            Self::InvalidDefaultFont { font } => write!(f, "invalid default font {}", font),
            Self::Exit => write!(f, "formatting finished"),
        }
    }
}

impl std::error::Error for FormatError {}
