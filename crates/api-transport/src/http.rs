//! reqwest-backed transport.

use crate::{Method, RequestOptions, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use sync_config_and_utils::Config;
use token_store::TokenReader;
use tracing::{debug, warn};
use url::Url;

/// JSON-over-HTTP transport rooted at a base URL.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: Url,
    token_reader: Option<TokenReader>,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://localhost:5000/api`)
    /// with a per-request deadline.
    pub fn new(base_url: &str, timeout: Duration) -> TransportResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::InvalidRequest(format!("{base_url}: {e}")))?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            http_client,
            base_url: with_trailing_slash(base_url),
            token_reader: None,
        })
    }

    pub fn from_config(config: &Config) -> TransportResult<Self> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    /// Fall back to the stored token when a request carries none.
    pub fn with_token_reader(mut self, reader: TokenReader) -> Self {
        self.token_reader = Some(reader);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn url_for(&self, path: &str) -> TransportResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("{path}: {e}")))
    }

    fn resolve_bearer(&self, options: RequestOptions) -> Option<String> {
        if options.bearer_token.is_some() {
            return options.bearer_token;
        }
        let reader = self.token_reader.as_ref()?;
        match reader.get() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, sending request without it");
                None
            }
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Pull a human-readable message out of an error body: `{"error": ..}` or
/// `{"message": ..}`, else the raw text.
pub(crate) fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message", "detail"] {
            if let Some(Value::String(msg)) = map.get(key) {
                return msg.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.len() > 200 {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> TransportResult<Value> {
        let url = self.url_for(path)?;
        let mut builder = match method {
            Method::Get => self.http_client.get(url),
            Method::Post => self.http_client.post(url),
            Method::Put => self.http_client.put(url),
            Method::Delete => self.http_client.delete(url),
        };

        if let Some(token) = self.resolve_bearer(options) {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        debug!(%method, path, "Sending request");

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = error_message(status, &text);
            debug!(%method, path, status = status.as_u16(), "Request failed");
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
