//! The `synapse run` command: start the runtime and pump stdin through the
//! built-in pipeline until EOF or Ctrl+C.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use synapse_config::Config;
use synapse_fault::install_panic_hook;
use synapse_runtime::{Runtime, StartReport};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::builtins::{CONSOLE_INPUT, ECHO_BRIDGE, factories};
use crate::theme::Theme;

/// Run until stdin closes or the process is interrupted.
pub(crate) async fn run(config: &Config) -> Result<()> {
    let (replies, mut remote) = mpsc::unbounded_channel::<Value>();
    let runtime = Arc::new(
        Runtime::from_config(config, factories(replies)).context("failed to build runtime")?,
    );
    install_panic_hook(Arc::clone(runtime.fault()));

    let report = runtime.start().await.context("failed to start runtime")?;
    print_start_report(&report);

    let pump_runtime = Arc::clone(&runtime);
    let pump = tokio::spawn(async move {
        while let Some(reply) = remote.recv().await {
            let Some(bridge) = pump_runtime.context().coordinator.find(ECHO_BRIDGE) else {
                continue;
            };
            if let Err(e) = bridge.submit(reply).await {
                warn!(error = %e, "Echo reply dropped");
            }
        }
    });

    let mut lines = stdin_lines();
    let reader_runtime = Arc::clone(&runtime);
    let mut reader = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            let Some(input) = reader_runtime.context().coordinator.find(CONSOLE_INPUT) else {
                warn!("console input is not loaded; ignoring stdin");
                break;
            };
            if let Err(e) = input.submit(Value::String(line)).await {
                warn!(error = %e, "Console input rejected a line");
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = &mut reader => info!("Input closed"),
    }

    runtime.shutdown().await;
    reader.abort();
    pump.abort();

    let stats = runtime.stats().await;
    eprintln!("{}", Theme::header("Session"));
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&stats).context("failed to format stats")?
    );
    Ok(())
}

/// Read stdin on a plain thread. A pending read there does not hold up
/// runtime shutdown the way `tokio::io::stdin` does.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_start_report(report: &StartReport) {
    eprintln!("{}", Theme::header("Synapse"));
    for id in &report.plugins.loaded {
        eprintln!("  {}", Theme::success(&format!("loaded {id}")));
    }
    for id in &report.plugins.skipped {
        eprintln!("  {}", Theme::dimmed(&format!("skipped {id}")));
    }
    for (id, error) in &report.plugins.failed {
        eprintln!("  {}", Theme::error(&format!("{id}: {error}")));
    }
    for failure in &report.activation.failures {
        eprintln!(
            "  {}",
            Theme::error(&format!(
                "{} ({}) failed to activate: {}",
                failure.component, failure.kind, failure.error
            ))
        );
    }
    eprintln!(
        "{}",
        Theme::info(&format!(
            "{}/{} component(s) active; type a line and press enter, Ctrl+D to quit",
            report.activation.activated, report.activation.total
        ))
    );
}
