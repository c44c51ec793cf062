//! HTTP/API probe implementation.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, StatusCode};

use super::{Execution, ProbeError};
use crate::db::{ProbeConfig, ProbeStatus};

const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for every HTTP and API probe.
pub struct HttpChecker {
    client: Client,
}

impl HttpChecker {
    pub fn new(connect_timeout: Duration) -> Result<Self, ProbeError> {
        // internal targets often run self-signed certificates
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProbeError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn check(&self, config: &ProbeConfig) -> Result<Execution, ProbeError> {
        let url = if config.target.starts_with("http://") || config.target.starts_with("https://") {
            config.target.clone()
        } else {
            format!("http://{}", config.target)
        };

        let method = if config.method.trim().is_empty() {
            Method::GET
        } else {
            Method::from_bytes(config.method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| ProbeError::Config(format!("invalid HTTP method: {}", config.method)))?
        };

        let mut request = self.client.request(method, &url).timeout(config.timeout);

        let mut has_user_agent = false;
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ProbeError::Config(format!("invalid header name {:?}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProbeError::Config(format!("invalid value for header {}: {}", key, e)))?;
            has_user_agent |= name == USER_AGENT;
            request = request.header(name, value);
        }
        if !has_user_agent {
            request = request.header(USER_AGENT, DEFAULT_USER_AGENT);
        }

        if !config.body.is_empty() {
            request = request.body(config.body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(config.timeout)
            } else {
                ProbeError::Network(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();

        if let Some(expected) = config.expected_status_code {
            if status.as_u16() != expected {
                return Ok(Execution::new(
                    ProbeStatus::Warning,
                    format!("expected status code {}, got {}", expected, status.as_u16()),
                ));
            }
        }

        if !status.is_success() {
            return Ok(Execution::down(describe(status)));
        }

        match config.expected_body.as_deref().filter(|b| !b.is_empty()) {
            Some(expected) => {
                let body = response.text().await.map_err(|e| {
                    if e.is_timeout() {
                        ProbeError::Timeout(config.timeout)
                    } else {
                        ProbeError::Network(format!("failed to read body: {}", e))
                    }
                })?;
                if body.contains(expected) {
                    Ok(Execution::up(describe(status)))
                } else {
                    Ok(Execution::new(
                        ProbeStatus::Warning,
                        format!("{}: response body does not contain {:?}", describe(status), expected),
                    ))
                }
            }
            None => Ok(Execution::up(describe(status))),
        }
    }
}

fn describe(status: StatusCode) -> String {
    format!("HTTP {}", status)
}
