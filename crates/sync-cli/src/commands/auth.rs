//! Authentication commands.

use super::value_or_prompt;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chrono::DateTime;
use serde_json::json;
use session_auth::{SessionStatus, User};
use sync_runtime::SyncRuntime;
use tracing::debug;

fn display_name(user: &User) -> &str {
    if !user.name.is_empty() {
        &user.name
    } else {
        user.email.as_deref().unwrap_or(&user.id)
    }
}

/// Log in with an identifier and a password read without echo.
pub async fn login(
    runtime: &SyncRuntime,
    identifier: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let session = runtime.session();
    match session.check_auth_status().await {
        Ok(SessionStatus::Authenticated) => {
            if let Some(user) = session.user() {
                output::print_success(
                    &format!("Already logged in as {}", display_name(&user)),
                    format,
                );
                return Ok(());
            }
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, "Stored session is not usable"),
    }

    let identifier = value_or_prompt(identifier, "Email")?;
    let secret = rpassword::prompt_password("Password: ")?;

    match session.login(&identifier, &secret).await {
        Ok(user) => {
            output::print_success(&format!("Logged in as {}", display_name(&user)), format)
        }
        Err(e) => output::print_error(&format!("Login failed: {e}"), format),
    }
    Ok(())
}

/// Create an account. Does not log in.
pub async fn register(
    runtime: &SyncRuntime,
    name: Option<String>,
    identifier: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let name = value_or_prompt(name, "Name")?;
    let identifier = value_or_prompt(identifier, "Email")?;
    let secret = rpassword::prompt_password("Password: ")?;

    match runtime.session().register(&name, &identifier, &secret).await {
        Ok(message) => output::print_success(&message, format),
        Err(e) => output::print_error(&format!("Registration failed: {e}"), format),
    }
    Ok(())
}

/// Log out and clear the stored token.
pub fn logout(runtime: &SyncRuntime, format: &OutputFormat) -> Result<()> {
    runtime.session().logout();
    output::print_success("Logged out", format);
    Ok(())
}

/// Verify the stored session and print the result.
pub async fn status(runtime: &SyncRuntime, format: &OutputFormat) -> Result<()> {
    let session = runtime.session();
    let result = session.check_auth_status().await;
    let snapshot = session.snapshot();
    let expires_at = session
        .claims()
        .and_then(|claims| claims.expires_at)
        .and_then(|exp| DateTime::from_timestamp(exp, 0));

    match format {
        OutputFormat::Text => {
            output::print_row("Auth", snapshot.status.as_str());
            if let Some(user) = &snapshot.user {
                output::print_row("User ID", &user.id);
                output::print_row("Name", &user.name);
                if let Some(email) = &user.email {
                    output::print_row("Email", email);
                }
                if let Some(role) = &user.role {
                    output::print_row("Role", role);
                }
            }
            if let Some(expires_at) = expires_at {
                output::print_row("Expires", &expires_at.to_rfc3339());
            }
            if let Err(e) = &result {
                output::print_row("Check", &e.to_string());
            }
        }
        OutputFormat::Json => output::print_json(&json!({
            "status": snapshot.status,
            "user": snapshot.user,
            "expires_at": expires_at,
            "error": result.err().map(|e| e.to_string()),
        })),
    }
    Ok(())
}
