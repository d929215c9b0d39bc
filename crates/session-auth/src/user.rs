//! Confirmed user identity.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// User identity as returned by the login and verification endpoints.
///
/// Field names follow the backend; Spanish aliases (`nombre`, `correo`,
/// `rol`) are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "correo", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "rol", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a non-empty string or number id, got {other}"
        ))),
    }
}
