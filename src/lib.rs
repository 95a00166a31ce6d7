//! Centinela - Production-safe function call tracing controller
//!
//! This library provides the supervising control logic that sits between a
//! raw trace-event source and a safely bounded, formatted output stream:
//! match-specification compilation, validated pattern installation, a
//! rate-limited tracer loop, and per-kind event rendering, wired together
//! under a session supervisor that tears everything down when its owner
//! goes away.

pub mod cli;
pub mod event;
pub mod format;
pub mod matchspec;
pub mod pattern;
pub mod session;
pub mod source;
pub mod tracer;

pub use event::{EventKind, Pid, TraceEvent};
pub use format::{render, ArgStyle, RenderOptions};
pub use matchspec::{ArgSelector, CallPredicate, CompileError, MatchSpec};
pub use pattern::{parse_pattern, InstallError, PidSpec, Scope, TracePattern};
pub use session::{Supervisor, TimestampMode, TraceOptions};
pub use source::{EventSource, SyntheticSource};
pub use tracer::{Limit, TracerState, RATE_LIMIT_NOTICE};
