//! Trace pattern registry
//!
//! Validates `{module, function, args}` patterns and pid scopes before any
//! event-source mutation. Installation is all-or-nothing: if any pattern
//! fails to compile or the source rejects one, nothing stays armed.

use crate::event::Pid;
use crate::matchspec::{ArgSelector, CompileError, CompiledArgs};
use crate::source::{EventSource, SourceError};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Module or function selector: a concrete name or the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NameSelector {
    Any,
    Name(String),
}

impl NameSelector {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameSelector::Any => true,
            NameSelector::Name(n) => n == name,
        }
    }
}

/// A `{module, function, argument-selector}` trace pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct TracePattern {
    pub module: NameSelector,
    pub function: NameSelector,
    pub args: ArgSelector,
}

impl TracePattern {
    pub fn new(module: NameSelector, function: NameSelector, args: ArgSelector) -> Self {
        TracePattern { module, function, args }
    }

    /// True when this pattern, combined with an `all` pid scope, would trace
    /// every call on the node.
    fn is_node_wide(&self) -> bool {
        self.module == NameSelector::Any
            && self.function == NameSelector::Any
            && matches!(self.args, ArgSelector::Any)
    }
}

/// A pattern after argument-selector compilation; the form handed to the
/// event source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPattern {
    pub module: NameSelector,
    pub function: NameSelector,
    pub args: CompiledArgs,
}

/// Which processes are eligible for tracing. Multiple specs combine with
/// union semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PidSpec {
    All,
    Existing,
    New,
    Pid(Pid),
    Name(String),
    Global(String),
    Via { registry: String, name: String },
}

/// Call scope: `Global` traces fully qualified calls only, `Local` also
/// traces intra-module calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Scope {
    #[default]
    Global,
    Local,
}

/// Why installation was refused. Validation failures are distinct from
/// compilation failures, and both precede any source mutation.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no trace patterns supplied")]
    NoPatterns,
    #[error("pattern {index}: {source}")]
    Compile {
        index: usize,
        #[source]
        source: CompileError,
    },
    #[error(
        "pattern {index} would trace every call on the node; \
         pass an explicit node-wide opt-in to allow this"
    )]
    TooBroad { index: usize },
    #[error("event source refused installation: {0}")]
    Source(#[from] SourceError),
    #[error("invalid trace pattern string {input:?}")]
    BadPatternString { input: String },
}

/// Parse a `module:function/arity` pattern string. `_` is the wildcard for
/// module and function; omitting `/arity` selects any arguments.
pub fn parse_pattern(input: &str) -> Result<TracePattern, InstallError> {
    static PATTERN_RE: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN_RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*|_):([a-z_][A-Za-z0-9_?!]*|_)(?:/(\d{1,3}))?$")
            .expect("pattern regex is valid")
    });
    let caps = re.captures(input).ok_or_else(|| InstallError::BadPatternString {
        input: input.to_string(),
    })?;

    let selector = |s: &str| {
        if s == "_" {
            NameSelector::Any
        } else {
            NameSelector::Name(s.to_string())
        }
    };
    let args = match caps.get(3) {
        Some(m) => {
            let arity: u16 = m.as_str().parse().map_err(|_| InstallError::BadPatternString {
                input: input.to_string(),
            })?;
            let arity = u8::try_from(arity).map_err(|_| InstallError::BadPatternString {
                input: input.to_string(),
            })?;
            ArgSelector::Arity(arity)
        }
        None => ArgSelector::Any,
    };
    Ok(TracePattern::new(selector(&caps[1]), selector(&caps[2]), args))
}

/// Compile and install patterns against the source, all-or-nothing.
///
/// Returns the number of patterns armed. Node-wide patterns (`_:_` with any
/// arguments and an `all` pid scope) are rejected before any source mutation
/// unless `allow_broad` is set.
pub fn install<S: EventSource + ?Sized>(
    source: &mut S,
    patterns: Vec<TracePattern>,
    pids: &[PidSpec],
    scope: Scope,
    allow_broad: bool,
) -> Result<usize, InstallError> {
    if patterns.is_empty() {
        return Err(InstallError::NoPatterns);
    }

    let all_pids = pids.is_empty() || pids.contains(&PidSpec::All);
    if !allow_broad && all_pids {
        if let Some(index) = patterns.iter().position(TracePattern::is_node_wide) {
            return Err(InstallError::TooBroad { index });
        }
    }

    let mut compiled = Vec::with_capacity(patterns.len());
    for (index, pattern) in patterns.into_iter().enumerate() {
        let args = pattern
            .args
            .compile()
            .map_err(|source| InstallError::Compile { index, source })?;
        compiled.push(CompiledPattern {
            module: pattern.module,
            function: pattern.function,
            args,
        });
    }

    match source.install(&compiled, pids, scope) {
        Ok(count) => {
            tracing::debug!(patterns = count, ?scope, "trace patterns armed");
            Ok(count)
        }
        Err(err) => {
            // Partial arming would break the operator's rate-limit budget.
            source.clear();
            Err(err.into())
        }
    }
}
