//! Session supervision
//!
//! One trace session runs node-wide at a time, as two cooperating loops:
//! the rate-limited tracer and the formatter, connected by an in-order
//! channel. The supervisor owns the single [`ActiveSession`] value; `calls`
//! replaces it (clear-then-install), `clear` tears it down, and dropping the
//! supervisor tears it down too, so tracing never outlives its owner.

use crate::format::{self, ArgStyle, FormatterFn, RenderOptions};
use crate::pattern::{self, InstallError, PidSpec, Scope, TracePattern};
use crate::source::EventSource;
use crate::tracer::{self, Limit, Outbound, TracerConfig, TracerHandle, TracerState};
use crossbeam::channel::{unbounded, Receiver};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Where the rendered timestamp comes from.
///
/// `Formatter` stamps at render time; `Trace` stamps when the tracer
/// receives the event, which is more accurate when formatting lags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    #[default]
    Formatter,
    Trace,
}

/// Session configuration. Everything is optional; defaults trace all pids,
/// render full arguments, stamp at format time, and write to stdout.
pub struct TraceOptions {
    pub pids: Vec<PidSpec>,
    pub timestamp: TimestampMode,
    pub args: ArgStyle,
    pub scope: Scope,
    /// Opt-in for node-wide wildcard patterns; see the registry's flood guard.
    pub allow_broad: bool,
    pub sink: Option<Box<dyn Write + Send>>,
    pub formatter: Option<FormatterFn>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        TraceOptions {
            pids: vec![PidSpec::All],
            timestamp: TimestampMode::default(),
            args: ArgStyle::default(),
            scope: Scope::default(),
            allow_broad: false,
            sink: None,
            formatter: None,
        }
    }
}

struct ActiveSession {
    tracer: TracerHandle,
    tracer_join: Option<JoinHandle<()>>,
    formatter_join: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Stop the tracer and wait for the formatter to drain everything that
    /// was already forwarded. Idempotent.
    fn shutdown(&mut self) {
        self.tracer.clear();
        if let Some(join) = self.tracer_join.take() {
            let _ = join.join();
        }
        if let Some(join) = self.formatter_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owns the event source and the at-most-one active session.
pub struct Supervisor<S: EventSource + Send + 'static> {
    source: Arc<Mutex<S>>,
    active: Option<ActiveSession>,
}

impl<S: EventSource + Send + 'static> Supervisor<S> {
    pub fn new(source: S) -> Self {
        Supervisor {
            source: Arc::new(Mutex::new(source)),
            active: None,
        }
    }

    /// Install trace patterns and start a session; returns how many patterns
    /// were armed. Any previous session is cleared first, so the source's
    /// pattern table is never shared between two sessions.
    pub fn calls(
        &mut self,
        patterns: Vec<TracePattern>,
        limit: Limit,
        opts: TraceOptions,
    ) -> Result<usize, InstallError> {
        self.clear();

        let (count, events) = {
            let mut src = self.lock_source();
            let count =
                pattern::install(&mut *src, patterns, &opts.pids, opts.scope, opts.allow_broad)?;
            (count, src.subscribe())
        };

        let (out_tx, out_rx) = unbounded();
        let disarm = {
            let source = Arc::clone(&self.source);
            Box::new(move || {
                source.lock().expect("event source lock poisoned").clear();
            }) as Box<dyn FnMut() + Send>
        };
        let (tracer, tracer_join) = tracer::spawn(
            events,
            out_tx,
            TracerConfig {
                limit,
                trace_timestamps: opts.timestamp == TimestampMode::Trace,
            },
            disarm,
        );

        let sink: Box<dyn Write + Send> = match opts.sink {
            Some(sink) => sink,
            None => Box::new(std::io::stdout()),
        };
        let render: FormatterFn = match opts.formatter {
            Some(f) => f,
            None => Box::new(|ev, o| format::render(ev, o)),
        };
        let formatter_join =
            spawn_formatter(out_rx, sink, render, RenderOptions { args: opts.args });

        tracing::debug!(patterns = count, "trace session started");
        self.active = Some(ActiveSession {
            tracer,
            tracer_join: Some(tracer_join),
            formatter_join: Some(formatter_join),
        });
        Ok(count)
    }

    /// Stop tracing unconditionally. Always succeeds; safe to call in any
    /// state, any number of times. The stopped session is retained so
    /// `state` observes the terminal `Stopped` state.
    pub fn clear(&mut self) {
        match self.active.as_mut() {
            Some(session) => {
                session.shutdown();
                tracing::debug!("trace session cleared");
            }
            None => {
                // No session of ours, but the source may still hold patterns
                // from a crashed predecessor.
                self.lock_source().clear();
            }
        }
    }

    /// Current session state; `Idle` when no session has ever been started,
    /// `Stopped` once a session ended for any reason.
    pub fn state(&self) -> TracerState {
        self.active
            .as_ref()
            .map_or(TracerState::Idle, |s| s.tracer.state())
    }

    fn lock_source(&self) -> std::sync::MutexGuard<'_, S> {
        self.source.lock().expect("event source lock poisoned")
    }
}

/// The formatter loop: renders accepted events to the sink in forwarding
/// order, writes notices verbatim, and exits only after the channel is
/// drained and disconnected.
fn spawn_formatter(
    rx: Receiver<Outbound>,
    mut sink: Box<dyn Write + Send>,
    render: FormatterFn,
    opts: RenderOptions,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("centinela-format".into())
        .spawn(move || {
            for msg in rx {
                let text = match msg {
                    Outbound::Event(event) => render(&event, &opts),
                    Outbound::Notice(notice) => format!("{notice}\n"),
                };
                if let Err(e) = sink.write_all(text.as_bytes()) {
                    tracing::warn!(error = %e, "trace sink write failed");
                }
            }
            let _ = sink.flush();
        })
        .expect("failed to spawn formatter thread")
}
