//! Ingestion of analysis configurations from structured documents.
//!
//! The accepted document is a JSON object keyed by rule name:
//!
//! ```json
//! {
//!     "java.grpc": {
//!         "pattern": "(.*/.*)",
//!         "exceptions": [
//!             {"name": "StatusRuntimeException", "metadata": {"code": "UNAVAILABLE"}}
//!         ],
//!         "errors": [
//!             {"service_name": "cart", "types": [{"forced_exception": {"name": "Timeout", "metadata": {}}}]}
//!         ]
//!     }
//! }
//! ```
//!
//! Every entry under `types` must itself be a recognized fault-descriptor
//! shape; anything else is a fatal configuration error, rejected here rather
//! than at injection time.

use crate::configuration::{AnalysisConfiguration, AnalysisConfigurationBuilder};
use faultline_protocol::{FaultDescriptor, ForcedException};
use log::info;
use serde::Deserialize;
use serde_json::Value;
use snafu::Snafu;

/// Errors from analysis configuration construction and ingestion.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AnalysisError {
    #[snafu(display("invalid pattern {pattern:?} in rule {rule:?}"))]
    InvalidPattern {
        rule: String,
        pattern: String,
        source: regex::Error,
    },

    #[snafu(display("invalid service pattern {pattern:?} in rule {rule:?}"))]
    InvalidServicePattern {
        rule: String,
        pattern: String,
        source: regex::Error,
    },

    #[snafu(display("malformed analysis document"), context(false))]
    Document { source: serde_json::Error },

    #[snafu(display("unrecognized fault shape in rule {rule:?}: {value}"))]
    UnrecognizedFaultShape { rule: String, value: String },
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    pattern: Option<String>,
    #[serde(default)]
    exceptions: Vec<ForcedException>,
    #[serde(default)]
    errors: Vec<ErrorRuleDocument>,
}

#[derive(Debug, Deserialize)]
struct ErrorRuleDocument {
    service_name: String,
    #[serde(default)]
    types: Vec<Value>,
}

/// The active analysis policy for one test: an ordered collection of rules.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfigurationFile {
    configurations: Vec<AnalysisConfiguration>,
}

impl AnalysisConfigurationFile {
    /// Build a file from already-compiled rules, preserving order.
    pub fn new(configurations: Vec<AnalysisConfiguration>) -> Self {
        Self { configurations }
    }

    /// Append a rule.
    pub fn push(&mut self, configuration: AnalysisConfiguration) {
        self.configurations.push(configuration);
    }

    /// The rules, in configured order.
    pub fn configurations(&self) -> &[AnalysisConfiguration] {
        &self.configurations
    }

    /// Parse a structured document keyed by rule name.
    ///
    /// Rule order follows document order.  Fails on a malformed document, a
    /// malformed pattern, or an unrecognized fault shape under `types`.
    pub fn from_document(document: &Value) -> Result<Self, AnalysisError> {
        // serde_json's preserve_order feature keeps document key order here,
        // which is what makes "ordered collection of rules" hold for
        // ingested documents.
        let rules: serde_json::Map<String, Value> = serde_json::from_value(document.clone())?;

        let mut configurations = Vec::with_capacity(rules.len());
        for (name, value) in rules {
            let rule: RuleDocument = serde_json::from_value(value)?;
            let mut builder = AnalysisConfigurationBuilder::new(&name);

            if let Some(pattern) = rule.pattern {
                builder = builder.pattern(pattern);
            }

            for exception in rule.exceptions {
                info!(
                    "analysis rule {}: exception fault {} ({:?})",
                    name, exception.name, exception.metadata
                );
                builder = builder.exception(exception.name, exception.metadata);
            }

            for error in rule.errors {
                let mut types = Vec::with_capacity(error.types.len());
                for value in error.types {
                    let rendered = value.to_string();
                    let fault: FaultDescriptor = serde_json::from_value(value).map_err(|_| {
                        AnalysisError::UnrecognizedFaultShape {
                            rule: name.clone(),
                            value: rendered.clone(),
                        }
                    })?;
                    types.push(fault);
                }
                info!(
                    "analysis rule {}: error faults for service {} ({} types)",
                    name,
                    error.service_name,
                    types.len()
                );
                builder = builder.error(error.service_name, types);
            }

            configurations.push(builder.build()?);
        }

        Ok(Self { configurations })
    }
}
