//! Payload vocabulary shared between the faultline core and the RPC
//! interception layer.
//!
//! The interception layer (HTTP/gRPC client and server interceptors, not
//! part of this workspace) captures every outbound remote call and hands the
//! core a structured [`InvocationPayload`].  The core answers with a
//! [`FaultDecision`]: either "proceed" or exactly one fault descriptor to
//! render back into the RPC stack.  Nothing here owns a network format —
//! transport is the interception layer's concern.
//!
//! Fault descriptors are externally tagged so their JSON shape is exactly
//! one of:
//!
//! ```text
//! {"forced_exception": {"name": "...", "metadata": {...}}}
//! {"failure_metadata": {"service_name": "...", "types": [...]}}
//! ```
//!
//! Any other shape is rejected during analysis-configuration ingestion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which instrumentation hook produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentationType {
    /// An outbound call is starting.
    Invocation,
    /// An outbound call has completed.
    InvocationComplete,
    /// A server received a request.
    RequestReceived,
}

/// One intercepted outbound RPC, as reported by the interception layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    /// Serialized canonical [`ExecutionIndex`](https://docs.rs/faultline-index) string.
    pub execution_index: String,
    /// Identifier of the calling service.
    pub module: String,
    /// Identifier of the invoked method.
    pub method: String,
    /// Serialized call arguments.
    #[serde(default)]
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation_type: Option<InstrumentationType>,
    /// Opaque causality metadata carried for the interception layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<Value>,
}

impl InvocationPayload {
    /// The `module/method` identifier analysis rule patterns match against.
    pub fn method_identifier(&self) -> String {
        format!("{}/{}", self.module, self.method)
    }
}

/// Completion payload for a finished RPC.
///
/// Only payloads carrying an `exception` feed the failed-RPC ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub execution_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation_type: Option<InstrumentationType>,
}

/// A call as stored in an execution ledger.
///
/// Built from an [`InvocationPayload`] with the instrumentation-type tag
/// stripped, so recorded calls compare equal across hook types.  The
/// arguments-free form ([`RecordedCall::without_arguments`]) additionally
/// drops `args`, making comparisons robust to nondeterministic inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCall {
    pub module: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<Value>,
}

impl RecordedCall {
    /// Record a call from its invocation payload, dropping the
    /// instrumentation-type tag.
    pub fn from_payload(payload: &InvocationPayload) -> Self {
        Self {
            module: payload.module.clone(),
            method: payload.method.clone(),
            args: Some(payload.args.clone()),
            vclock: payload.vclock.clone(),
        }
    }

    /// The same call with its (possibly nondeterministic) arguments dropped.
    pub fn without_arguments(&self) -> Self {
        Self {
            args: None,
            ..self.clone()
        }
    }

    /// The `module/method` identifier for this call.
    pub fn method_identifier(&self) -> String {
        format!("{}/{}", self.module, self.method)
    }

    /// Whether two recorded calls describe the same RPC, ignoring where in
    /// the call graph they occurred (module, method, and arguments only).
    pub fn same_rpc(&self, other: &Self) -> bool {
        self.module == other.module && self.method == other.method && self.args == other.args
    }
}

/// A forced exception: exception class name plus string metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedException {
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Service-scoped failure metadata: a target service-name pattern plus the
/// error type objects to try against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMetadata {
    pub service_name: String,
    #[serde(default)]
    pub types: Vec<Value>,
}

/// A fault to force at a specific execution index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultDescriptor {
    ForcedException(ForcedException),
    FailureMetadata(FailureMetadata),
}

impl FaultDescriptor {
    /// Convenience constructor for a forced exception.
    pub fn forced_exception(
        name: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self::ForcedException(ForcedException {
            name: name.into(),
            metadata,
        })
    }
}

/// The core's answer to `begin_invocation`: proceed, or force a fault.
///
/// `generated_id` is a legacy monotonic call number, superseded by the
/// execution index but still required by instrumentation libraries and
/// useful in debugging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultDecision {
    pub generated_id: u32,
    #[serde(flatten)]
    pub fault: Option<FaultDescriptor>,
}

impl FaultDecision {
    /// Whether this decision forces a fault.
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// Acknowledgment echoed back from `end_invocation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndInvocationAck {
    pub execution_index: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> InvocationPayload {
        InvocationPayload {
            execution_index: r#"[["svc","f.rs:1","get",0]]"#.to_string(),
            module: "svc".to_string(),
            method: "get".to_string(),
            args: "key=user-123".to_string(),
            instrumentation_type: Some(InstrumentationType::Invocation),
            vclock: None,
        }
    }

    #[test]
    fn method_identifier_composes_module_and_method() {
        assert_eq!(sample_payload().method_identifier(), "svc/get");
    }

    #[test]
    fn recorded_call_strips_instrumentation_type() {
        let payload = sample_payload();
        let call = RecordedCall::from_payload(&payload);
        let value = serde_json::to_value(&call).unwrap();
        assert!(value.get("instrumentation_type").is_none());
        assert_eq!(value["args"], json!("key=user-123"));
    }

    #[test]
    fn without_arguments_drops_args_only() {
        let call = RecordedCall::from_payload(&sample_payload());
        let cleaned = call.without_arguments();
        assert_eq!(cleaned.args, None);
        assert_eq!(cleaned.module, call.module);
        assert_eq!(cleaned.method, call.method);
    }

    #[test]
    fn same_rpc_ignores_vclock() {
        let mut a = RecordedCall::from_payload(&sample_payload());
        let mut b = a.clone();
        a.vclock = Some(json!({"svc": 1}));
        b.vclock = Some(json!({"svc": 7}));
        assert!(a.same_rpc(&b));
    }

    #[test]
    fn forced_exception_wire_shape() {
        let fault = FaultDescriptor::forced_exception(
            "StatusRuntimeException",
            BTreeMap::from([("code".to_string(), "UNAVAILABLE".to_string())]),
        );
        let value = serde_json::to_value(&fault).unwrap();
        assert_eq!(
            value,
            json!({
                "forced_exception": {
                    "name": "StatusRuntimeException",
                    "metadata": {"code": "UNAVAILABLE"}
                }
            })
        );
    }

    #[test]
    fn failure_metadata_wire_shape() {
        let fault = FaultDescriptor::FailureMetadata(FailureMetadata {
            service_name: "cart".to_string(),
            types: vec![json!({"forced_exception": {"name": "Timeout", "metadata": {}}})],
        });
        let value = serde_json::to_value(&fault).unwrap();
        assert!(value.get("failure_metadata").is_some());
        assert_eq!(value["failure_metadata"]["service_name"], json!("cart"));
    }

    #[test]
    fn unknown_fault_shape_is_rejected() {
        let result: Result<FaultDescriptor, _> =
            serde_json::from_value(json!({"surprise": {"name": "x"}}));
        assert!(result.is_err());
    }

    #[test]
    fn decision_without_fault_serializes_flat() {
        let decision = FaultDecision {
            generated_id: 3,
            fault: None,
        };
        assert_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({"generated_id": 3})
        );
    }

    #[test]
    fn decision_with_fault_round_trips() {
        let decision = FaultDecision {
            generated_id: 1,
            fault: Some(FaultDescriptor::forced_exception(
                "Unavailable",
                BTreeMap::new(),
            )),
        };
        let value = serde_json::to_value(&decision).unwrap();
        assert!(value.get("forced_exception").is_some());

        let restored: FaultDecision = serde_json::from_value(value).unwrap();
        assert_eq!(restored, decision);
    }

    #[test]
    fn instrumentation_type_snake_case() {
        assert_eq!(
            serde_json::to_value(InstrumentationType::InvocationComplete).unwrap(),
            json!("invocation_complete")
        );
    }

    #[test]
    fn payload_args_default_to_empty() {
        let payload: InvocationPayload = serde_json::from_value(json!({
            "execution_index": "[]",
            "module": "svc",
            "method": "get"
        }))
        .unwrap();
        assert_eq!(payload.args, "");
        assert_eq!(payload.instrumentation_type, None);
    }
}
