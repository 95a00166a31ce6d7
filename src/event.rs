//! Trace event model
//!
//! Events arrive from the event source as a closed set of kinds. The
//! formatter dispatches on [`EventKind`]; kinds it does not recognize are
//! carried in [`EventKind::Unknown`] so rendering can never fail.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// Dynamic term type for call arguments, messages and return values.
pub type Term = serde_json::Value;

/// A process identifier, rendered in the `<0.N.0>` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<0.{}.0>", self.0)
    }
}

/// A module name, spanning two naming systems: host-language modules carry
/// the `Elixir.` namespace prefix, anything else is a foreign module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ModuleName(pub String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleName(name.into())
    }

    /// Display form: host modules lose the `Elixir.` prefix, foreign modules
    /// gain a leading `:` so the two systems stay distinguishable.
    pub fn display_name(&self) -> String {
        match self.0.strip_prefix("Elixir.") {
            Some(rest) => rest.to_string(),
            None => format!(":{}", self.0),
        }
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// A `module.function/arity` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mfa {
    pub module: ModuleName,
    pub function: String,
    pub arity: u8,
}

impl Mfa {
    pub fn new(module: impl Into<String>, function: impl Into<String>, arity: u8) -> Self {
        Mfa {
            module: ModuleName::new(module),
            function: function.into(),
            arity,
        }
    }
}

impl fmt::Display for Mfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.module, self.function, self.arity)
    }
}

/// Message recipient: either a pid or a registered name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Recipient {
    Pid(Pid),
    Name(String),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Pid(p) => write!(f, "{}", p),
            Recipient::Name(n) => f.write_str(n),
        }
    }
}

/// Exception class for `exception_from` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionClass {
    Error,
    Exit,
    Throw,
}

impl fmt::Display for ExceptionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExceptionClass::Error => "error",
            ExceptionClass::Exit => "exit",
            ExceptionClass::Throw => "throw",
        };
        f.write_str(s)
    }
}

/// Heap figures carried by garbage-collection events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcInfo {
    pub heap_size: u64,
    pub old_heap_size: u64,
    pub mbuf_size: u64,
}

impl GcInfo {
    /// Total bytes reported in rendered output.
    pub fn total(&self) -> u64 {
        self.heap_size + self.old_heap_size + self.mbuf_size
    }
}

/// Kind-specific payload of a trace event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Call {
        module: ModuleName,
        function: String,
        args: Vec<Term>,
    },
    ReturnFrom {
        mfa: Mfa,
        value: Term,
    },
    ReturnTo {
        mfa: Mfa,
    },
    ExceptionFrom {
        mfa: Mfa,
        class: ExceptionClass,
        value: Term,
    },
    Send {
        to: Recipient,
        message: Term,
    },
    SendToNonExistingProcess {
        to: Recipient,
        message: Term,
    },
    Receive {
        message: Term,
    },
    Spawn {
        child: Pid,
        module: ModuleName,
        function: String,
        args: Vec<Term>,
    },
    Link {
        peer: Pid,
    },
    Unlink {
        peer: Pid,
    },
    GettingLinked {
        peer: Pid,
    },
    GettingUnlinked {
        peer: Pid,
    },
    Register {
        name: String,
    },
    Unregister {
        name: String,
    },
    /// Scheduled in; `location` is absent when the source reported no mfa.
    In {
        location: Option<Mfa>,
    },
    Out {
        location: Option<Mfa>,
    },
    GcStart {
        info: GcInfo,
    },
    GcEnd {
        info: GcInfo,
    },
    /// Anything the source emitted that this controller does not model.
    Unknown {
        raw_kind: String,
        payload: Term,
    },
}

/// A single trace event: emitting process, optional trace-time timestamp,
/// kind-specific payload.
///
/// `ts` is `None` unless the session was configured for trace-time
/// timestamps; the formatter stamps at render time in that case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub pid: Pid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Local>>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TraceEvent {
    pub fn new(pid: Pid, kind: EventKind) -> Self {
        TraceEvent { pid, ts: None, kind }
    }

    pub fn call(pid: Pid, module: &str, function: &str, args: Vec<Term>) -> Self {
        TraceEvent::new(
            pid,
            EventKind::Call {
                module: ModuleName::new(module),
                function: function.to_string(),
                args,
            },
        )
    }

    pub fn return_from(pid: Pid, mfa: Mfa, value: Term) -> Self {
        TraceEvent::new(pid, EventKind::ReturnFrom { mfa, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(245).to_string(), "<0.245.0>");
    }

    #[test]
    fn test_host_module_strips_prefix() {
        assert_eq!(
            ModuleName::new("Elixir.MyApp.Worker").display_name(),
            "MyApp.Worker"
        );
    }

    #[test]
    fn test_foreign_module_gets_marker() {
        assert_eq!(ModuleName::new("queue").display_name(), ":queue");
    }

    #[test]
    fn test_mfa_display() {
        assert_eq!(Mfa::new("queue", "in", 2).to_string(), ":queue.in/2");
    }

    #[test]
    fn test_gc_total_sums_all_fields() {
        let info = GcInfo {
            heap_size: 100,
            old_heap_size: 50,
            mbuf_size: 7,
        };
        assert_eq!(info.total(), 157);
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let ev = TraceEvent::call(Pid(1), "queue", "in", vec![json!(1)]);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "call");
        assert_eq!(v["module"], "queue");
        assert!(v.get("ts").is_none());
    }
}
