//! CLI argument parsing for Centinela

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::format::ArgStyle;
use crate::pattern::{PidSpec, Scope};
use crate::session::TimestampMode;
use crate::tracer::Limit;

/// Output format for trace lines
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TimestampArg {
    /// Stamp at formatting time (default)
    Formatter,
    /// Stamp when the tracer receives the event
    Trace,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    /// Fully qualified calls only (default)
    Global,
    /// Also trace intra-module calls
    Local,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PidArg {
    /// All processes (default)
    All,
    /// Processes alive before the session started
    Existing,
    /// Processes spawned after the session started
    New,
}

#[derive(Parser, Debug)]
#[command(name = "centinela")]
#[command(version)]
#[command(about = "Production-safe call tracing controller demo", long_about = None)]
pub struct Cli {
    /// Trace patterns: module:function/arity, with _ as wildcard
    /// (e.g. queue:in/2, _:handle_call, Elixir.MyApp.Worker:_)
    #[arg(required = true, value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Stop after forwarding this many events
    #[arg(short = 'l', long = "limit", value_name = "COUNT", default_value = "10")]
    pub limit: u64,

    /// Throttle instead of stopping: COUNT/WINDOW_MS sliding window
    #[arg(short = 'r', long = "rate", value_name = "COUNT/WINDOW_MS", conflicts_with = "limit")]
    pub rate: Option<String>,

    /// Render /arity instead of literal call arguments
    #[arg(long = "arity")]
    pub arity: bool,

    /// Timestamp source
    #[arg(long = "timestamp", value_enum, default_value = "formatter")]
    pub timestamp: TimestampArg,

    /// Call scope
    #[arg(long = "scope", value_enum, default_value = "global")]
    pub scope: ScopeArg,

    /// Pid scope
    #[arg(long = "pid", value_enum, default_value = "all")]
    pub pid: PidArg,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Allow node-wide wildcard patterns (normally rejected as unsafe)
    #[arg(long = "allow-broad")]
    pub allow_broad: bool,

    /// Enable debug output to stderr
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

impl Cli {
    pub fn limit(&self) -> Result<Limit> {
        match &self.rate {
            None => Ok(Limit::Count(self.limit)),
            Some(spec) => {
                let (count, window_ms) = spec
                    .split_once('/')
                    .with_context(|| format!("invalid rate spec {spec:?}, expected COUNT/WINDOW_MS"))?;
                let max: u64 = count
                    .parse()
                    .with_context(|| format!("invalid rate count {count:?}"))?;
                let window_ms: u64 = window_ms
                    .parse()
                    .with_context(|| format!("invalid rate window {window_ms:?}"))?;
                if window_ms == 0 {
                    bail!("rate window must be at least 1ms");
                }
                Ok(Limit::Rate {
                    max,
                    window: Duration::from_millis(window_ms),
                })
            }
        }
    }

    pub fn timestamp_mode(&self) -> TimestampMode {
        match self.timestamp {
            TimestampArg::Formatter => TimestampMode::Formatter,
            TimestampArg::Trace => TimestampMode::Trace,
        }
    }

    pub fn arg_style(&self) -> ArgStyle {
        if self.arity {
            ArgStyle::Arity
        } else {
            ArgStyle::Args
        }
    }

    pub fn scope(&self) -> Scope {
        match self.scope {
            ScopeArg::Global => Scope::Global,
            ScopeArg::Local => Scope::Local,
        }
    }

    pub fn pid_specs(&self) -> Vec<PidSpec> {
        vec![match self.pid {
            PidArg::All => PidSpec::All,
            PidArg::Existing => PidSpec::Existing,
            PidArg::New => PidSpec::New,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_patterns() {
        let cli = Cli::parse_from(["centinela", "queue:in/2", "queue:out/1"]);
        assert_eq!(cli.patterns, vec!["queue:in/2", "queue:out/1"]);
        assert_eq!(cli.limit, 10);
    }

    #[test]
    fn test_cli_requires_a_pattern() {
        assert!(Cli::try_parse_from(["centinela"]).is_err());
    }

    #[test]
    fn test_cli_count_limit() {
        let cli = Cli::parse_from(["centinela", "--limit", "3", "queue:in/2"]);
        assert_eq!(cli.limit().unwrap(), Limit::Count(3));
    }

    #[test]
    fn test_cli_rate_limit() {
        let cli = Cli::parse_from(["centinela", "--rate", "5/1000", "queue:in/2"]);
        assert_eq!(
            cli.limit().unwrap(),
            Limit::Rate {
                max: 5,
                window: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_cli_rejects_bad_rate() {
        let cli = Cli::parse_from(["centinela", "--rate", "5", "queue:in/2"]);
        assert!(cli.limit().is_err());
        let cli = Cli::parse_from(["centinela", "--rate", "5/0", "queue:in/2"]);
        assert!(cli.limit().is_err());
    }

    #[test]
    fn test_cli_arity_flag() {
        let cli = Cli::parse_from(["centinela", "--arity", "queue:in/2"]);
        assert_eq!(cli.arg_style(), ArgStyle::Arity);
    }
}
