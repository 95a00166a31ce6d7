use anyhow::{Context, Result};
use centinela::cli::{Cli, OutputFormat};
use centinela::event::{EventKind, GcInfo, ModuleName, Pid, Recipient, TraceEvent};
use centinela::format::{self, FormatterFn};
use centinela::pattern::parse_pattern;
use centinela::session::{Supervisor, TraceOptions};
use centinela::source::{EventSource, SyntheticSource};
use centinela::tracer::TracerState;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Drive a scripted workload through the synthetic source: a queue worker
/// serving a shell process, plus the ambient events (send, receive, spawn,
/// gc) a live node would produce around it.
fn run_workload(source: &SyntheticSource) {
    let shell = Pid(64);
    let worker = Pid(245);
    let child = Pid(301);

    source.emit_call_result(worker, "queue", "new", vec![], json!([]));
    source.emit_call_result(worker, "queue", "in", vec![json!(1), json!([])], json!([1]));
    source.emit_call_result(worker, "queue", "in", vec![json!(2), json!([1])], json!([2, 1]));
    source.emit_call_result(
        worker,
        "queue",
        "out",
        vec![json!([2, 1])],
        json!({"value": 2, "rest": [1]}),
    );
    source.emit_call_result(
        shell,
        "Elixir.Demo.Worker",
        "handle_call",
        vec![json!("pop"), json!("from"), json!({"items": [2, 1]})],
        json!({"reply": 2}),
    );
    // Intra-module call, only visible with --scope local.
    source.emit_unqualified_call(worker, "queue", "len", vec![json!([1])]);

    source.emit(TraceEvent::new(
        worker,
        EventKind::Send {
            to: Recipient::Pid(shell),
            message: json!({"reply": 2}),
        },
    ));
    source.emit(TraceEvent::new(
        shell,
        EventKind::Receive {
            message: json!({"reply": 2}),
        },
    ));
    source.emit(TraceEvent::new(
        worker,
        EventKind::Spawn {
            child,
            module: ModuleName::new("Elixir.Demo.Worker"),
            function: "init".into(),
            args: vec![json!([])],
        },
    ));
    source.emit(TraceEvent::new(
        worker,
        EventKind::Register {
            name: "queue_owner".into(),
        },
    ));
    // The spawned process makes a call of its own; with --pid new it is the
    // only one in scope.
    source.emit_call_result(child, "queue", "new", vec![], json!([]));
    source.emit(TraceEvent::new(
        worker,
        EventKind::GcStart {
            info: GcInfo {
                heap_size: 233,
                old_heap_size: 0,
                mbuf_size: 0,
            },
        },
    ));
    source.emit(TraceEvent::new(
        worker,
        EventKind::GcEnd {
            info: GcInfo {
                heap_size: 34,
                old_heap_size: 0,
                mbuf_size: 0,
            },
        },
    ));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let patterns = cli
        .patterns
        .iter()
        .map(|p| parse_pattern(p).with_context(|| format!("bad pattern {p:?}")))
        .collect::<Result<Vec<_>>>()?;
    let limit = cli.limit()?;

    let source = SyntheticSource::new();
    // The shell and the worker exist before the session starts.
    source.observe(Pid(64));
    source.observe(Pid(245));

    let formatter: Option<FormatterFn> = match cli.format {
        OutputFormat::Text => None,
        OutputFormat::Json => Some(Box::new(format::render_json)),
    };

    let mut supervisor = Supervisor::new(source.clone());
    let armed = supervisor
        .calls(
            patterns,
            limit,
            TraceOptions {
                pids: cli.pid_specs(),
                timestamp: cli.timestamp_mode(),
                args: cli.arg_style(),
                scope: cli.scope(),
                allow_broad: cli.allow_broad,
                formatter,
                ..TraceOptions::default()
            },
        )
        .context("failed to start trace session")?;
    eprintln!("[centinela: armed {} patterns]", armed);

    run_workload(&source);

    // Close the event stream, then wait for the tracer to stop on its own:
    // the disconnect path drains every queued event first, while a clear
    // racing a non-empty inbox would drop whatever it had not reached yet.
    {
        let mut source = source.clone();
        source.clear();
    }
    while supervisor.state() != TracerState::Stopped {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    supervisor.clear();
    Ok(())
}
