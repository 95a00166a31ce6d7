//! Event source abstraction
//!
//! The native trace capability is host-runtime-owned; the controller only
//! needs a narrow surface to arm patterns and consume events. Keeping that
//! surface a trait lets the whole pipeline run against [`SyntheticSource`]
//! in tests and in the demo binary.

use crate::event::{EventKind, Mfa, Pid, Term, TraceEvent};
use crate::pattern::{CompiledPattern, PidSpec, Scope};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    Rejected(String),
}

/// Narrow interface to the trace-event capability.
///
/// `install` arms patterns against a pid scope and returns how many were
/// armed; `clear` disarms everything and closes the event stream;
/// `subscribe` hands out the single consumer side of that stream.
pub trait EventSource {
    fn install(
        &mut self,
        patterns: &[CompiledPattern],
        pids: &[PidSpec],
        scope: Scope,
    ) -> Result<usize, SourceError>;

    fn clear(&mut self);

    fn subscribe(&mut self) -> Receiver<TraceEvent>;
}

#[derive(Default)]
struct Inner {
    armed: Vec<CompiledPattern>,
    pids: Vec<PidSpec>,
    scope: Scope,
    tx: Option<Sender<TraceEvent>>,
    rx: Option<Receiver<TraceEvent>>,
    /// Pids observed before the current install, for `existing`/`new` scopes.
    snapshot: HashSet<Pid>,
    seen: HashSet<Pid>,
    names: HashMap<String, Pid>,
    globals: HashMap<String, Pid>,
    via: HashMap<(String, String), Pid>,
    fail_next_install: bool,
}

/// An in-process event source that applies compiled match specifications
/// inline, the way the native system would: pattern match, guard
/// evaluation, and the return-trace action all happen here, with no caller
/// code on the hot path.
///
/// Clones share state; hand one clone to the supervisor and keep another to
/// drive the workload.
#[derive(Clone, Default)]
pub struct SyntheticSource {
    inner: Arc<Mutex<Inner>>,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a pid as existing before the next install, for `existing`/`new`
    /// pid-scope semantics.
    pub fn observe(&self, pid: Pid) {
        self.lock().seen.insert(pid);
    }

    /// Register a local name for pid-scope resolution.
    pub fn register_name(&self, name: &str, pid: Pid) {
        self.lock().names.insert(name.to_string(), pid);
    }

    pub fn register_global(&self, name: &str, pid: Pid) {
        self.lock().globals.insert(name.to_string(), pid);
    }

    pub fn register_via(&self, registry: &str, name: &str, pid: Pid) {
        self.lock()
            .via
            .insert((registry.to_string(), name.to_string()), pid);
    }

    /// Make the next `install` fail, for all-or-nothing tests.
    pub fn fail_next_install(&self) {
        self.lock().fail_next_install = true;
    }

    pub fn armed_count(&self) -> usize {
        self.lock().armed.len()
    }

    /// Emit a fully qualified call. Returns whether the event was forwarded.
    pub fn emit_call(&self, pid: Pid, module: &str, function: &str, args: Vec<Term>) -> bool {
        self.emit_call_inner(pid, module, function, args, None, true)
    }

    /// Emit a fully qualified call with its return value; a matching pattern
    /// whose specification requested return tracing also emits the paired
    /// `return_from` event.
    pub fn emit_call_result(
        &self,
        pid: Pid,
        module: &str,
        function: &str,
        args: Vec<Term>,
        ret: Term,
    ) -> bool {
        self.emit_call_inner(pid, module, function, args, Some(ret), true)
    }

    /// Emit an intra-module call, visible only under `Scope::Local`.
    pub fn emit_unqualified_call(
        &self,
        pid: Pid,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> bool {
        self.emit_call_inner(pid, module, function, args, None, false)
    }

    /// Emit a non-call event (send, receive, gc, ...). Forwarded whenever a
    /// session is armed and the pid is in scope.
    pub fn emit(&self, event: TraceEvent) -> bool {
        let inner = self.lock();
        let Some(tx) = inner.tx.as_ref() else {
            return false;
        };
        if inner.armed.is_empty() || !pid_in_scope(&inner, event.pid) {
            return false;
        }
        tx.send(event).is_ok()
    }

    fn emit_call_inner(
        &self,
        pid: Pid,
        module: &str,
        function: &str,
        args: Vec<Term>,
        ret: Option<Term>,
        qualified: bool,
    ) -> bool {
        let mut inner = self.lock();
        inner.seen.insert(pid);
        let Some(tx) = inner.tx.clone() else {
            return false;
        };
        if !qualified && inner.scope == Scope::Global {
            return false;
        }
        if !pid_in_scope(&inner, pid) {
            return false;
        }
        let Some(outcome) = inner.armed.iter().find_map(|pattern| {
            (pattern.module.matches(module) && pattern.function.matches(function))
                .then(|| pattern.args.matches(&args))
                .flatten()
        }) else {
            return false;
        };
        drop(inner);

        let arity = args.len() as u8;
        let sent = tx.send(TraceEvent::call(pid, module, function, args)).is_ok();
        if sent && outcome.return_trace {
            if let Some(value) = ret {
                let mfa = Mfa::new(module, function, arity);
                let _ = tx.send(TraceEvent::new(pid, EventKind::ReturnFrom { mfa, value }));
            }
        }
        sent
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("synthetic source lock poisoned")
    }
}

fn pid_in_scope(inner: &Inner, pid: Pid) -> bool {
    if inner.pids.is_empty() {
        return true;
    }
    inner.pids.iter().any(|spec| match spec {
        PidSpec::All => true,
        PidSpec::Existing => inner.snapshot.contains(&pid),
        PidSpec::New => !inner.snapshot.contains(&pid),
        PidSpec::Pid(p) => *p == pid,
        PidSpec::Name(n) => inner.names.get(n) == Some(&pid),
        PidSpec::Global(n) => inner.globals.get(n) == Some(&pid),
        PidSpec::Via { registry, name } => {
            inner.via.get(&(registry.clone(), name.clone())) == Some(&pid)
        }
    })
}

impl EventSource for SyntheticSource {
    fn install(
        &mut self,
        patterns: &[CompiledPattern],
        pids: &[PidSpec],
        scope: Scope,
    ) -> Result<usize, SourceError> {
        let mut inner = self.lock();
        if inner.fail_next_install {
            inner.fail_next_install = false;
            return Err(SourceError::Rejected("install refused by test hook".into()));
        }
        let (tx, rx) = unbounded();
        inner.armed = patterns.to_vec();
        inner.pids = pids.to_vec();
        inner.scope = scope;
        inner.snapshot = inner.seen.clone();
        inner.tx = Some(tx);
        inner.rx = Some(rx);
        Ok(patterns.len())
    }

    fn clear(&mut self) {
        let mut inner = self.lock();
        inner.armed.clear();
        inner.pids.clear();
        // Dropping the sender disconnects any subscriber, which is how
        // downstream loops learn the source went away.
        inner.tx = None;
        inner.rx = None;
    }

    fn subscribe(&mut self) -> Receiver<TraceEvent> {
        let mut inner = self.lock();
        match inner.rx.take() {
            Some(rx) => rx,
            None => {
                // No active install: hand back an already-disconnected stream.
                let (_tx, rx) = unbounded();
                rx
            }
        }
    }
}
