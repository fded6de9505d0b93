//! A single analysis rule: a call-site pattern and its candidate faults.

use crate::document::{AnalysisError, InvalidPatternSnafu, InvalidServicePatternSnafu};
use faultline_protocol::{FailureMetadata, FaultDescriptor, ForcedException};
use regex::{Regex, RegexBuilder};
use snafu::ResultExt;
use std::collections::BTreeMap;

/// An error rule: a service-name pattern plus the fault types to try when
/// the calling service matches.
#[derive(Debug, Clone)]
pub struct ErrorRule {
    service_name: String,
    service_pattern: Regex,
    types: Vec<FaultDescriptor>,
}

impl ErrorRule {
    fn new(rule_name: &str, service_name: String, types: Vec<FaultDescriptor>) -> Result<Self, AnalysisError> {
        // Service matching is case-insensitive, unlike method patterns.
        let service_pattern = RegexBuilder::new(&service_name)
            .case_insensitive(true)
            .build()
            .context(InvalidServicePatternSnafu {
                rule: rule_name,
                pattern: service_name.clone(),
            })?;
        Ok(Self {
            service_name,
            service_pattern,
            types,
        })
    }

    /// The configured service-name pattern, verbatim.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether this rule applies to calls originating from `service`.
    pub fn matches_service(&self, service: &str) -> bool {
        self.service_pattern.is_match(service)
    }

    /// The fault types to schedule, in configured order.
    pub fn types(&self) -> &[FaultDescriptor] {
        &self.types
    }
}

/// One named analysis rule.
///
/// The `pattern` is a case-sensitive regex matched against the
/// `module/method` identifier of each intercepted call; a rule without a
/// pattern matches nothing.
#[derive(Debug, Clone)]
pub struct AnalysisConfiguration {
    name: String,
    pattern: Option<Regex>,
    exceptions: Vec<ForcedException>,
    errors: Vec<ErrorRule>,
}

impl AnalysisConfiguration {
    /// Start building a rule with the given name.
    pub fn builder(name: impl Into<String>) -> AnalysisConfigurationBuilder {
        AnalysisConfigurationBuilder::new(name)
    }

    /// The rule's label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the configured pattern matches a `module/method` identifier.
    pub fn is_pattern_match(&self, method_identifier: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(method_identifier),
            None => false,
        }
    }

    /// One fault descriptor per configured exception, in order.
    pub fn exception_fault_objects(&self) -> Vec<FaultDescriptor> {
        self.exceptions
            .iter()
            .cloned()
            .map(FaultDescriptor::ForcedException)
            .collect()
    }

    /// One service-scoped fault descriptor per configured error rule, in
    /// order, in the `{failure_metadata: {service_name, types}}` wire shape.
    pub fn error_fault_objects(&self) -> Vec<FaultDescriptor> {
        self.errors
            .iter()
            .map(|rule| {
                let types = rule
                    .types
                    .iter()
                    .map(|fault| {
                        serde_json::to_value(fault).expect("fault descriptor encoding is infallible")
                    })
                    .collect();
                FaultDescriptor::FailureMetadata(FailureMetadata {
                    service_name: rule.service_name.clone(),
                    types,
                })
            })
            .collect()
    }

    /// The error rules, in configured order.
    pub fn errors(&self) -> &[ErrorRule] {
        &self.errors
    }
}

/// Builder for [`AnalysisConfiguration`].
///
/// Patterns are compiled at [`build`](Self::build) time so a malformed
/// regex surfaces as a configuration error, not a panic.
pub struct AnalysisConfigurationBuilder {
    name: String,
    pattern: Option<String>,
    exceptions: Vec<ForcedException>,
    errors: Vec<(String, Vec<FaultDescriptor>)>,
}

impl AnalysisConfigurationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: None,
            exceptions: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Set the call-site pattern (regex over `module/method`).
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Add a candidate exception fault.
    pub fn exception(
        mut self,
        name: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        self.exceptions.push(ForcedException {
            name: name.into(),
            metadata,
        });
        self
    }

    /// Add a candidate error rule scoped to a service-name pattern.
    pub fn error(
        mut self,
        service_name: impl Into<String>,
        types: Vec<FaultDescriptor>,
    ) -> Self {
        self.errors.push((service_name.into(), types));
        self
    }

    /// Compile the rule.
    pub fn build(self) -> Result<AnalysisConfiguration, AnalysisError> {
        let pattern = match self.pattern {
            Some(raw) => Some(Regex::new(&raw).context(InvalidPatternSnafu {
                rule: self.name.clone(),
                pattern: raw.clone(),
            })?),
            None => None,
        };

        let mut errors = Vec::with_capacity(self.errors.len());
        for (service_name, types) in self.errors {
            errors.push(ErrorRule::new(&self.name, service_name, types)?);
        }

        Ok(AnalysisConfiguration {
            name: self.name,
            pattern,
            exceptions: self.exceptions,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grpc_rule() -> AnalysisConfiguration {
        AnalysisConfiguration::builder("grpc")
            .pattern(r"svc/(get)\b")
            .exception(
                "StatusRuntimeException",
                BTreeMap::from([("code".to_string(), "UNAVAILABLE".to_string())]),
            )
            .exception(
                "StatusRuntimeException",
                BTreeMap::from([("code".to_string(), "NOT_FOUND".to_string())]),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn pattern_match_is_case_sensitive() {
        let rule = grpc_rule();
        assert!(rule.is_pattern_match("svc/get"));
        assert!(!rule.is_pattern_match("SVC/GET"));
        assert!(!rule.is_pattern_match("svc/getall"));
    }

    #[test]
    fn rule_without_pattern_matches_nothing() {
        let rule = AnalysisConfiguration::builder("empty").build().unwrap();
        assert!(!rule.is_pattern_match("svc/get"));
    }

    #[test]
    fn exception_faults_preserve_configured_order() {
        let faults = grpc_rule().exception_fault_objects();
        assert_eq!(faults.len(), 2);

        let first = serde_json::to_value(&faults[0]).unwrap();
        assert_eq!(
            first["forced_exception"]["metadata"]["code"],
            json!("UNAVAILABLE")
        );
        let second = serde_json::to_value(&faults[1]).unwrap();
        assert_eq!(
            second["forced_exception"]["metadata"]["code"],
            json!("NOT_FOUND")
        );
    }

    #[test]
    fn error_rule_service_match_is_case_insensitive() {
        let rule = AnalysisConfiguration::builder("errors")
            .pattern(".*")
            .error(
                "cart",
                vec![FaultDescriptor::forced_exception("Timeout", BTreeMap::new())],
            )
            .build()
            .unwrap();

        let error = &rule.errors()[0];
        assert!(error.matches_service("cart"));
        assert!(error.matches_service("CartService"));
        assert!(!error.matches_service("checkout"));
    }

    #[test]
    fn error_fault_objects_use_failure_metadata_shape() {
        let rule = AnalysisConfiguration::builder("errors")
            .error(
                "cart",
                vec![FaultDescriptor::forced_exception("Timeout", BTreeMap::new())],
            )
            .build()
            .unwrap();

        let faults = rule.error_fault_objects();
        assert_eq!(faults.len(), 1);
        let value = serde_json::to_value(&faults[0]).unwrap();
        assert_eq!(value["failure_metadata"]["service_name"], json!("cart"));
        assert_eq!(value["failure_metadata"]["types"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn malformed_pattern_is_a_configuration_error() {
        let result = AnalysisConfiguration::builder("bad").pattern("(unclosed").build();
        assert!(result.is_err());
    }

    #[test]
    fn malformed_service_pattern_is_a_configuration_error() {
        let result = AnalysisConfiguration::builder("bad")
            .error("(unclosed", Vec::new())
            .build();
        assert!(result.is_err());
    }
}
