//! Live feed command.

use crate::output::{self, OutputFormat};
use anyhow::{anyhow, bail, Result};
use live_subscriptions::{Constraint, FeedData, FeedError, FeedState, FilterOp, SortDirection};
use serde_json::{json, Value};
use sync_runtime::SyncRuntime;

/// Parse `field op value`. The value is read as JSON when possible and as a
/// plain string otherwise.
fn parse_filter(raw: &str) -> Result<Constraint> {
    let usage = || anyhow!("invalid filter `{raw}`, expected `field op value`");
    let (field, rest) = raw.trim().split_once(char::is_whitespace).ok_or_else(usage)?;
    let (op, value) = rest.trim_start().split_once(char::is_whitespace).ok_or_else(usage)?;
    let op = FilterOp::parse(op).ok_or_else(|| anyhow!("unknown operator `{op}` in `{raw}`"))?;

    let value = value.trim();
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok(Constraint::where_(field, op, value))
}

fn parse_order(raw: &str) -> Result<Constraint> {
    let (field, direction) = match raw.split_once(':') {
        Some((field, "asc")) => (field, SortDirection::Asc),
        Some((field, "desc")) => (field, SortDirection::Desc),
        Some((_, other)) => bail!("unknown sort direction `{other}`"),
        None => (raw, SortDirection::Asc),
    };
    Ok(Constraint::order_by(field, direction))
}

pub fn parse_constraints(
    filters: &[String],
    order_by: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Constraint>> {
    let mut constraints = filters
        .iter()
        .map(|raw| parse_filter(raw))
        .collect::<Result<Vec<_>>>()?;
    if let Some(order_by) = order_by {
        constraints.push(parse_order(order_by)?);
    }
    if let Some(limit) = limit {
        constraints.push(Constraint::limit(limit));
    }
    Ok(constraints)
}

fn render(path: &str, state: &FeedState, format: &OutputFormat) {
    if let OutputFormat::Json = format {
        output::print_json(&json!({ "path": path, "state": state }));
        return;
    }

    if let Some(error) = &state.error {
        output::print_error(&error.to_string(), format);
    }
    match &state.data {
        FeedData::Collection(records) => {
            output::print_heading(&format!("{path} ({} records)", records.len()));
            for record in records {
                println!("  {record}");
            }
        }
        FeedData::Document(Some(record)) => {
            output::print_heading(path);
            output::print_json(record);
        }
        FeedData::Document(None) => println!("{path}: document does not exist"),
        FeedData::Empty => {}
    }
}

/// Print every update of a live feed until interrupted, the feed closes or
/// the session ends.
pub async fn watch(
    runtime: &SyncRuntime,
    path: &str,
    constraints: Vec<Constraint>,
    format: &OutputFormat,
) -> Result<()> {
    if !runtime.start().await.is_authenticated() {
        output::print_error("Not logged in. Run 'syncctl login' first", format);
        return Ok(());
    }

    let subscription = runtime.subscriptions().subscribe(path, constraints);
    let mut updates = subscription.watch();
    loop {
        let state = updates.borrow_and_update().clone();
        if !state.loading {
            render(path, &state, format);
            if state.error == Some(FeedError::Closed) || !runtime.session().is_authenticated() {
                break;
            }
            if matches!(
                state.error,
                Some(FeedError::InvalidPath(_) | FeedError::InvalidQuery(_))
            ) {
                break;
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    subscription.close();
    runtime.shutdown();
    Ok(())
}
