//! CLI command implementations.

mod auth;
mod dashboard;
mod watch;

pub use auth::{login, logout, register, status};
pub use dashboard::dashboard;
pub use watch::{parse_constraints, watch};

use anyhow::Result;
use std::io::{self, Write};

/// Read one trimmed line from stdin after printing `label`.
fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn value_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => prompt(label),
    }
}
