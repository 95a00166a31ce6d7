//! Trace event rendering
//!
//! `render` is a pure function over a [`TraceEvent`] so it can back custom
//! pipelines as well as the session's formatter loop. Every kind in the
//! closed set has its own template; anything else falls through to a
//! diagnostic line, so rendering never fails.

use crate::event::{EventKind, Term, TraceEvent};
use chrono::Local;

/// Argument rendering: the literal argument list, or `/arity` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgStyle {
    #[default]
    Args,
    Arity,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub args: ArgStyle,
}

/// Render function signature accepted as a session formatter override.
pub type FormatterFn = Box<dyn Fn(&TraceEvent, &RenderOptions) -> String + Send>;

/// Render one event as a `hh:mm:ss.ffffff <0.N.0> body` line.
///
/// Uses the event's own timestamp when the session attached one at trace
/// time; otherwise stamps now, at formatting time.
pub fn render(event: &TraceEvent, opts: &RenderOptions) -> String {
    let ts = event.ts.unwrap_or_else(Local::now);
    format!(
        "{} {} {}\n",
        ts.format("%H:%M:%S%.6f"),
        event.pid,
        escape_tildes(&body(event, opts))
    )
}

/// Render one event as a single JSON line.
pub fn render_json(event: &TraceEvent, _opts: &RenderOptions) -> String {
    match serde_json::to_string(event) {
        Ok(s) => format!("{s}\n"),
        Err(e) => format!("{{\"error\":\"unserializable trace event: {e}\"}}\n"),
    }
}

/// Escape literal `~` so downstream template-based writers cannot interpret
/// payload text as format directives.
pub fn escape_tildes(s: &str) -> String {
    s.replace('~', "~~")
}

fn body(event: &TraceEvent, opts: &RenderOptions) -> String {
    match &event.kind {
        EventKind::Call {
            module,
            function,
            args,
        } => match opts.args {
            ArgStyle::Args => format!("{}.{}({})", module, function, render_args(args)),
            ArgStyle::Arity => format!("{}.{}/{}", module, function, args.len()),
        },
        EventKind::ReturnFrom { mfa, value } => {
            format!("{} --> {}", mfa, render_term(value))
        }
        EventKind::ReturnTo { mfa } => mfa.to_string(),
        EventKind::ExceptionFrom { mfa, class, value } => {
            format!("{} {} {}", mfa, class, render_term(value))
        }
        // Send bodies carry their leading space, matching the original
        // ` > to: msg` template.
        EventKind::Send { to, message } => {
            format!(" > {}: {}", to, render_term(message))
        }
        EventKind::SendToNonExistingProcess { to, message } => {
            format!(" > (non_existent) {}: {}", to, render_term(message))
        }
        EventKind::Receive { message } => format!("< {}", render_term(message)),
        EventKind::Spawn {
            child,
            module,
            function,
            args,
        } => format!("spawned {} as {}.{}({})", child, module, function, render_args(args)),
        EventKind::Link { peer } => format!("link({})", peer),
        EventKind::Unlink { peer } => format!("unlink({})", peer),
        EventKind::GettingLinked { peer } => format!("getting linked by {}", peer),
        EventKind::GettingUnlinked { peer } => format!("getting unlinked by {}", peer),
        EventKind::Register { name } => format!("registered as {}", name),
        EventKind::Unregister { name } => format!("no longer registered as {}", name),
        EventKind::In { location } => match location {
            Some(mfa) => format!("scheduled in for {}", mfa),
            None => "scheduled in".to_string(),
        },
        EventKind::Out { location } => match location {
            Some(mfa) => format!("scheduled out from {}", mfa),
            None => "scheduled out".to_string(),
        },
        EventKind::GcStart { info } => {
            format!("gc beginning -- heap {} bytes", info.total())
        }
        EventKind::GcEnd { info } => {
            format!("gc finished -- heap {} bytes", info.total())
        }
        EventKind::Unknown { raw_kind, payload } => {
            format!("unknown trace type {} -- {}", raw_kind, render_term(payload))
        }
    }
}

fn render_args(args: &[Term]) -> String {
    args.iter()
        .map(render_term)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_term(term: &Term) -> String {
    term.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ExceptionClass, GcInfo, Mfa, Pid, Recipient};
    use serde_json::json;

    fn line_body(event: &TraceEvent, opts: &RenderOptions) -> String {
        let line = render(event, opts);
        // "hh:mm:ss.ffffff <0.N.0> body\n"
        let mut parts = line.trim_end().splitn(3, ' ');
        let ts = parts.next().unwrap();
        assert_eq!(ts.len(), "00:00:00.000000".len());
        let _pid = parts.next().unwrap();
        parts.next().unwrap().to_string()
    }

    #[test]
    fn test_call_with_args() {
        let ev = TraceEvent::call(Pid(1), "queue", "in", vec![json!(1), json!([])]);
        assert_eq!(line_body(&ev, &RenderOptions::default()), ":queue.in(1, [])");
    }

    #[test]
    fn test_call_arity_only() {
        let ev = TraceEvent::call(Pid(1), "queue", "in", vec![json!(1), json!([])]);
        let opts = RenderOptions { args: ArgStyle::Arity };
        assert_eq!(line_body(&ev, &opts), ":queue.in/2");
    }

    #[test]
    fn test_host_module_call() {
        let ev = TraceEvent::call(Pid(1), "Elixir.MyApp.Worker", "run", vec![]);
        assert_eq!(line_body(&ev, &RenderOptions::default()), "MyApp.Worker.run()");
    }

    #[test]
    fn test_return_from() {
        let ev = TraceEvent::return_from(Pid(1), Mfa::new("queue", "in", 2), json!([1]));
        assert_eq!(line_body(&ev, &RenderOptions::default()), ":queue.in/2 --> [1]");
    }

    #[test]
    fn test_exception_from() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::ExceptionFrom {
                mfa: Mfa::new("queue", "out", 1),
                class: ExceptionClass::Error,
                value: json!("badarg"),
            },
        );
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            ":queue.out/1 error \"badarg\""
        );
    }

    #[test]
    fn test_send_and_receive() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::Send {
                to: Recipient::Pid(Pid(9)),
                message: json!("hi"),
            },
        );
        assert_eq!(line_body(&ev, &RenderOptions::default()), " > <0.9.0>: \"hi\"");

        let ev = TraceEvent::new(Pid(1), EventKind::Receive { message: json!(42) });
        assert_eq!(line_body(&ev, &RenderOptions::default()), "< 42");
    }

    #[test]
    fn test_send_to_non_existing() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::SendToNonExistingProcess {
                to: Recipient::Name("nobody".into()),
                message: json!(1),
            },
        );
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            " > (non_existent) nobody: 1"
        );
    }

    #[test]
    fn test_spawn_link_register() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::Spawn {
                child: Pid(7),
                module: crate::event::ModuleName::new("queue"),
                function: "new".into(),
                args: vec![],
            },
        );
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            "spawned <0.7.0> as :queue.new()"
        );

        let ev = TraceEvent::new(Pid(1), EventKind::Link { peer: Pid(7) });
        assert_eq!(line_body(&ev, &RenderOptions::default()), "link(<0.7.0>)");

        let ev = TraceEvent::new(Pid(1), EventKind::GettingUnlinked { peer: Pid(7) });
        assert_eq!(line_body(&ev, &RenderOptions::default()), "getting unlinked by <0.7.0>");

        let ev = TraceEvent::new(Pid(1), EventKind::Register { name: "shell".into() });
        assert_eq!(line_body(&ev, &RenderOptions::default()), "registered as shell");

        let ev = TraceEvent::new(Pid(1), EventKind::Unregister { name: "shell".into() });
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            "no longer registered as shell"
        );
    }

    #[test]
    fn test_scheduling_with_and_without_mfa() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::In {
                location: Some(Mfa::new("queue", "in", 2)),
            },
        );
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            "scheduled in for :queue.in/2"
        );

        let ev = TraceEvent::new(Pid(1), EventKind::Out { location: None });
        assert_eq!(line_body(&ev, &RenderOptions::default()), "scheduled out");
    }

    #[test]
    fn test_gc_totals() {
        let info = GcInfo {
            heap_size: 200,
            old_heap_size: 100,
            mbuf_size: 11,
        };
        let ev = TraceEvent::new(Pid(1), EventKind::GcStart { info });
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            "gc beginning -- heap 311 bytes"
        );
        let ev = TraceEvent::new(Pid(1), EventKind::GcEnd { info });
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            "gc finished -- heap 311 bytes"
        );
    }

    #[test]
    fn test_unknown_kind_renders_fallback() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::Unknown {
                raw_kind: "busy_port".into(),
                payload: json!({"port": 3}),
            },
        );
        assert_eq!(
            line_body(&ev, &RenderOptions::default()),
            "unknown trace type busy_port -- {\"port\":3}"
        );
    }

    #[test]
    fn test_tilde_escaping_preserves_payload() {
        let ev = TraceEvent::new(
            Pid(1),
            EventKind::Receive {
                message: json!("a~b"),
            },
        );
        let body = line_body(&ev, &RenderOptions::default());
        assert_eq!(body, "< \"a~~b\"");
        assert!(body.replace("~~", "~").contains("a~b"));
    }

    #[test]
    fn test_trace_time_timestamp_is_used() {
        let mut ev = TraceEvent::call(Pid(1), "queue", "in", vec![]);
        let fixed = Local::now() - chrono::Duration::hours(1);
        ev.ts = Some(fixed);
        let line = render(&ev, &RenderOptions::default());
        assert!(line.starts_with(&fixed.format("%H:%M:%S%.6f").to_string()));
    }
}
