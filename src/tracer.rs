//! Rate-limited tracer loop
//!
//! The sole consumer of raw trace events for the active session. Per-event
//! work is minimal: stamp (when configured), count, check the limit, then
//! forward over an unbounded channel or drop. The loop never blocks on the
//! formatter; a slow sink must not back events up into this loop's inbox.

use crate::event::TraceEvent;
use chrono::Local;
use crossbeam::channel::{Receiver, Sender};
use crossbeam::select;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Printed to the sink when an absolute count limit trips, bypassing any
/// custom formatter.
pub const RATE_LIMIT_NOTICE: &str = "centinela tracer rate limit tripped.";

/// Forwarding budget for a session.
///
/// `Count` terminates the session once reached; `Rate` drops events beyond
/// the allowed count per sliding window but keeps the session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(u64),
    Rate { max: u64, window: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TracerState {
    Idle = 0,
    Armed = 1,
    Tracing = 2,
    Stopped = 3,
}

impl TracerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TracerState::Idle,
            1 => TracerState::Armed,
            2 => TracerState::Tracing,
            _ => TracerState::Stopped,
        }
    }
}

/// What the tracer forwards to the formatter loop, in order.
#[derive(Debug)]
pub enum Outbound {
    Event(TraceEvent),
    /// Always written verbatim to the sink, never through a custom formatter.
    Notice(String),
}

enum Control {
    Clear,
}

/// Handle kept by the supervisor: observe state, request a clear.
pub struct TracerHandle {
    ctl: Sender<Control>,
    state: Arc<AtomicU8>,
}

impl TracerHandle {
    pub fn state(&self) -> TracerState {
        TracerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Idempotent; a no-op once the loop has stopped.
    pub fn clear(&self) {
        let _ = self.ctl.send(Control::Clear);
    }
}

pub struct TracerConfig {
    pub limit: Limit,
    /// Stamp events on receipt instead of leaving it to the formatter.
    pub trace_timestamps: bool,
}

/// Spawn the tracer loop. `disarm` disables all patterns at the event
/// source; it runs exactly once, on whichever of clear, count exhaustion, or
/// source disconnect stops the loop first.
pub fn spawn(
    events: Receiver<TraceEvent>,
    out: Sender<Outbound>,
    config: TracerConfig,
    disarm: Box<dyn FnMut() + Send>,
) -> (TracerHandle, JoinHandle<()>) {
    let state = Arc::new(AtomicU8::new(TracerState::Armed as u8));
    let (ctl_tx, ctl_rx) = crossbeam::channel::unbounded();
    let handle_state = Arc::clone(&state);

    let join = thread::Builder::new()
        .name("centinela-tracer".into())
        .spawn(move || run(events, out, config, disarm, ctl_rx, state))
        .expect("failed to spawn tracer thread");

    (
        TracerHandle {
            ctl: ctl_tx,
            state: handle_state,
        },
        join,
    )
}

fn run(
    events: Receiver<TraceEvent>,
    out: Sender<Outbound>,
    config: TracerConfig,
    mut disarm: Box<dyn FnMut() + Send>,
    ctl: Receiver<Control>,
    state: Arc<AtomicU8>,
) {
    let mut forwarded: u64 = 0;
    let mut window: VecDeque<Instant> = VecDeque::new();

    loop {
        select! {
            recv(ctl) -> msg => {
                // An explicit clear, or the supervisor went away.
                let _ = msg;
                tracing::debug!("tracer stopping on clear");
                break;
            }
            recv(events) -> msg => {
                let Ok(mut event) = msg else {
                    tracing::debug!("event source closed, tracer stopping");
                    break;
                };
                if state.load(Ordering::SeqCst) == TracerState::Armed as u8 {
                    state.store(TracerState::Tracing as u8, Ordering::SeqCst);
                    tracing::debug!("first event received, tracing");
                }
                if config.trace_timestamps && event.ts.is_none() {
                    event.ts = Some(Local::now());
                }
                match config.limit {
                    Limit::Count(max) => {
                        if forwarded >= max {
                            // Only reachable with max == 0: trip before
                            // forwarding anything.
                            trip(&out, &mut disarm, &state);
                            return;
                        }
                        forwarded += 1;
                        let _ = out.send(Outbound::Event(event));
                        if forwarded == max {
                            trip(&out, &mut disarm, &state);
                            return;
                        }
                    }
                    Limit::Rate { max, window: span } => {
                        let now = Instant::now();
                        while window.front().is_some_and(|&t| now.duration_since(t) >= span) {
                            window.pop_front();
                        }
                        if (window.len() as u64) < max {
                            window.push_back(now);
                            let _ = out.send(Outbound::Event(event));
                        } else {
                            tracing::trace!("event dropped by rate limit");
                        }
                    }
                }
            }
        }
    }

    disarm();
    state.store(TracerState::Stopped as u8, Ordering::SeqCst);
}

fn trip(out: &Sender<Outbound>, disarm: &mut Box<dyn FnMut() + Send>, state: &Arc<AtomicU8>) {
    tracing::debug!("count limit reached, tracing stopped");
    let _ = out.send(Outbound::Notice(RATE_LIMIT_NOTICE.to_string()));
    disarm();
    state.store(TracerState::Stopped as u8, Ordering::SeqCst);
}
