//! Line filling, justification, diversions and traps for `roffline`.
//!
//! A [`Session`] accumulates content units into lines, picks breakpoints,
//! justifies and hyphenates, then places each finished line either on the
//! paginated top level or into a capture buffer. Vertical motion springs traps
//! through a caller-supplied [`TrapHandler`].

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

mod breakpoint;
mod config;
mod diversion;
mod environment;
mod macros;
mod registers;
mod session;
mod sink;
mod tabs;

pub use breakpoint::{choose_breakpoint, distribute_from_start, BreakPolicy, Selection, SpaceSpreader};
pub use config::{AdjustMode, FormatConfig, HyphenationConfig};
pub use diversion::{ClosedDiversion, MacroDiversion, Outcome, OutputLine, PageState, TopLevel, Trap};
pub use environment::{
    Environment, EnvironmentStack, LineContext, LineEnd, LineInterruption, PendingLine, ScopeFlags,
};
pub use macros::{CapturedMacro, DivertedItem, MacroStore};
pub use registers::Registers;
pub use session::{NoTraps, Session, TrapHandler};
pub use sink::{FileInclusion, NullSink, OutputSink, PageCollector, SinkEvent, TypesetLine, TypesetPage};
pub use tabs::{NextTab, TabAlign, TabStop, TabStops};
