//! Dashboard command.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use dashboard_aggregator::{DashboardSnapshot, RefreshReason, SourceValue};
use serde_json::Value;
use sync_runtime::SyncRuntime;

fn summarize(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("{} items", items.len()),
        other => other.to_string(),
    }
}

fn render(snapshot: &DashboardSnapshot, format: &OutputFormat) {
    if let OutputFormat::Json = format {
        output::print_json(snapshot);
        return;
    }

    output::print_heading("Dashboard");
    for (name, source) in &snapshot.sources {
        let line = match source {
            SourceValue::Fetched { value } => summarize(value),
            SourceValue::Defaulted { value, error } => {
                format!("{} (default, {error})", summarize(value))
            }
        };
        output::print_row(name, &line);
    }
    if let Some(last_update) = snapshot.last_update {
        output::print_row("Updated", &last_update.to_rfc3339());
    }
    if snapshot.connection_degraded {
        output::print_row("Connection", "degraded");
    } else if let Some(partial) = snapshot.partial_failure() {
        output::print_row("Connection", &partial.to_string());
    }
}

/// Refresh and print the dashboard; with `watch`, keep printing new
/// snapshots until interrupted or the session ends.
pub async fn dashboard(runtime: &SyncRuntime, watch: bool, format: &OutputFormat) -> Result<()> {
    if !runtime.start().await.is_authenticated() {
        output::print_error("Not logged in. Run 'syncctl login' first", format);
        return Ok(());
    }

    let dashboard = runtime.dashboard();
    let snapshot = match dashboard.refresh(RefreshReason::Manual).await {
        Some(snapshot) => snapshot,
        // A concurrent refresh won; show what it applied.
        None => dashboard.snapshot(),
    };
    render(&snapshot, format);

    if watch {
        let mut updates = dashboard.subscribe_snapshot();
        updates.borrow_and_update();
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    if snapshot.is_empty() {
                        output::print_error("Session ended", format);
                        break;
                    }
                    render(&snapshot, format);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    runtime.shutdown();
    Ok(())
}
