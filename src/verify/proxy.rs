//! Proxy environment propagation.
//!
//! An explicitly set lowercase proxy variable wins over its uppercase form.
//! When only the uppercase form is set, its value must show up under the
//! lowercase name.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{CheckOutcome, CheckTarget, Diagnostic, VerificationEngine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCheck {
    /// Lowercase variable name, e.g. `http_proxy`.
    pub variable: String,
    #[serde(default)]
    pub upper_value: Option<String>,
    #[serde(default)]
    pub lower_value: Option<String>,
}

impl ProxyCheck {
    /// Both forms set; the lowercase value must win.
    pub fn precedence(variable: &str, upper: &str, lower: &str) -> Self {
        Self {
            variable: variable.to_lowercase(),
            upper_value: Some(upper.to_string()),
            lower_value: Some(lower.to_string()),
        }
    }

    /// Only the uppercase form set; it must reach the lowercase name.
    pub fn propagation(variable: &str, upper: &str) -> Self {
        Self {
            variable: variable.to_lowercase(),
            upper_value: Some(upper.to_string()),
            lower_value: None,
        }
    }

    /// The value the lowercase variable should hold inside the container.
    pub fn expected(&self) -> &str {
        self.lower_value
            .as_deref()
            .or(self.upper_value.as_deref())
            .unwrap_or_default()
    }

    /// Environment passed to the container.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(upper) = &self.upper_value {
            env.push((self.variable.to_uppercase(), upper.clone()));
        }
        if let Some(lower) = &self.lower_value {
            env.push((self.variable.clone(), lower.clone()));
        }
        env
    }
}

impl VerificationEngine {
    pub(super) async fn check_proxy(
        &self,
        check: &ProxyCheck,
        target: &CheckTarget<'_>,
    ) -> Result<CheckOutcome> {
        let name = match check.lower_value {
            Some(_) => format!("proxy precedence {}", check.variable),
            None => format!("proxy propagation {}", check.variable),
        };

        let out = self
            .run_in_image(target, &check.env(), &format!("echo ${}", check.variable))
            .await?;

        let actual = out.stdout.trim();
        if actual == check.expected() {
            Ok(CheckOutcome::pass(name))
        } else {
            let mut diagnostic = Diagnostic::new(&name, check.expected(), actual);
            for (key, value) in check.env() {
                diagnostic = diagnostic.with_context(format!("{}={}", key, value));
            }
            Ok(CheckOutcome::fail(diagnostic))
        }
    }
}
