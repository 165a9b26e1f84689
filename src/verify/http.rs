//! HTTP response checks against a running container.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{
    no_container, CheckOutcome, CheckTarget, Comparison, Diagnostic, OutputFilter, OutputRule,
    VerificationEngine,
};

/// GET a path on the container and compare the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub path: String,
    /// Without a rule only a 200 status is required.
    #[serde(default)]
    pub expect: Option<OutputRule>,
}

impl HttpCheck {
    /// Status-only check, used for binary assets.
    pub fn status_ok(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expect: None,
        }
    }

    pub fn expect(path: impl Into<String>, rule: OutputRule) -> Self {
        Self {
            path: path.into(),
            expect: Some(rule),
        }
    }

    fn name(&self) -> String {
        format!("http {}", self.path)
    }
}

impl VerificationEngine {
    pub(super) async fn check_http(
        &self,
        check: &HttpCheck,
        target: &CheckTarget<'_>,
    ) -> Result<CheckOutcome> {
        let name = check.name();
        let Some(container) = target.container else {
            return Ok(no_container(&name));
        };
        let Some(ip) = container.ip().await? else {
            return Ok(CheckOutcome::fail(
                Diagnostic::new(&name, "a container IP address", "none")
                    .with_context(format!("cid file: {}", container.cid_file().display())),
            ));
        };

        self.check_http_at(&ip, check).await
    }

    /// Polls `http://<host>:<port><path>` until it answers 200, then compares.
    pub async fn check_http_at(&self, host: &str, check: &HttpCheck) -> Result<CheckOutcome> {
        let name = check.name();
        let url = format!("http://{}:{}{}", host, self.http_port, check.path);

        tracing::debug!(url = %url, "waiting for HTTP 200");

        let body = self
            .http_policy
            .poll_value(|| {
                let request = self.client.get(&url);
                async move {
                    let response = match request.send().await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::trace!(error = %e, "request failed");
                            return None;
                        }
                    };
                    if response.status() != reqwest::StatusCode::OK {
                        tracing::trace!(status = %response.status(), "not ready");
                        return None;
                    }
                    response.bytes().await.ok()
                }
            })
            .await;

        let Some(body) = body else {
            return Ok(CheckOutcome::fail(
                Diagnostic::new(&name, "HTTP 200", "no 200 response")
                    .with_context(format!("url: {}", url))
                    .with_context(format!(
                        "attempts: {}",
                        self.http_policy.max_attempts.max(1)
                    )),
            ));
        };

        let Some(rule) = &check.expect else {
            return Ok(CheckOutcome::pass(name));
        };

        // Unfiltered exact matches compare raw bytes.
        if rule.filter == OutputFilter::Identity && rule.comparison == Comparison::Exact {
            if body[..] == *rule.expected.as_bytes() {
                return Ok(CheckOutcome::pass(name));
            }
            return Ok(CheckOutcome::fail(
                Diagnostic::new(&name, &rule.expected, String::from_utf8_lossy(&body))
                    .with_context(format!("url: {}", url)),
            ));
        }

        let mut outcome = rule.evaluate(&name, &String::from_utf8_lossy(&body));
        if let Some(diagnostic) = outcome.diagnostic.take() {
            outcome.diagnostic = Some(diagnostic.with_context(format!("url: {}", url)));
        }
        Ok(outcome)
    }
}
