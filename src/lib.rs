//! Content units, glyph metrics, hyphenation and diagnostics for `roffline`.
//!
//! This crate holds the pieces of the typesetter that do not depend on page
//! state: the [`Node`] contract the line builder works through, the
//! [`GlyphMetrics`] hook, the pattern-based hyphenation engine and the shared
//! diagnostic/error types. The formatting session itself lives in
//! `roffline-format`.

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod diagnostic;
pub mod error;
pub mod hyphen;
pub mod metrics;
pub mod node;
pub mod units;

pub use diagnostic::{Diagnostic, Diagnostics, Severity};
pub use error::FormatError;
pub use hyphen::{
    Exception, HyphenationLanguage, HyphenationLimits, HyphenationMode, PatternLoadReport,
    PatternTrie,
};
pub use metrics::{FixedPitchMetrics, FontId, GlyphMetrics};
pub use node::{
    BreakCandidate, BreakCandidates, Discretionary, DiscretionaryKind, Glyph, HyphenationType,
    Node, Space, VerticalExtent,
};
