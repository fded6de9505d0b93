//! Execution ledgers — the record of what one test iteration did.
//!
//! A [`PartialTestExecution`] is a fault-injection *plan*: "replay the call
//! graph, and when you reach index I, force fault F".  It says nothing about
//! observed calls, and two partials are the same logical search-frontier
//! node iff they demand the same faults at the same indexes.
//!
//! A [`ConcreteTestExecution`] is the full realized record of one run:
//! every call observed (in both argument-carrying and argument-free forms),
//! every fault injected, every failed RPC.  Two concrete runs are equal iff
//! they observed the same calls with the same payloads *and* injected the
//! same faults — the stricter equality that lets the engine recognize when
//! further expansion from a run is redundant.

use faultline_index::ExecutionIndex;
use faultline_protocol::{FaultDescriptor, InvocationPayload, RecordedCall, ResponsePayload};
use log::info;
use std::collections::{HashMap, HashSet};

/// A fault-injection plan: the prefix of an execution still to be realized.
#[derive(Debug, Clone, Default)]
pub struct PartialTestExecution {
    faults_to_inject: HashMap<ExecutionIndex, FaultDescriptor>,
}

impl PartialTestExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demand a fault at the given index.
    pub fn add_fault_to_inject(&mut self, index: ExecutionIndex, fault: FaultDescriptor) {
        self.faults_to_inject.insert(index, fault);
    }

    /// Whether this plan forces a fault at `index`.
    pub fn should_fault(&self, index: &ExecutionIndex) -> bool {
        self.faults_to_inject.contains_key(index)
    }

    /// The fault forced at `index`, if any.
    pub fn fault_at(&self, index: &ExecutionIndex) -> Option<&FaultDescriptor> {
        self.faults_to_inject.get(index)
    }

    /// Number of faults this plan forces.
    pub fn fault_count(&self) -> usize {
        self.faults_to_inject.len()
    }

    /// Whether this plan forces any fault at all.
    pub fn was_fault_injected(&self) -> bool {
        !self.faults_to_inject.is_empty()
    }

    /// The forced-fault map.
    pub fn faults_to_inject(&self) -> &HashMap<ExecutionIndex, FaultDescriptor> {
        &self.faults_to_inject
    }
}

// Dedup contract: two partials are the same frontier node iff their
// forced-fault maps are structurally equal.  Nothing else participates.
impl PartialEq for PartialTestExecution {
    fn eq(&self, other: &Self) -> bool {
        self.faults_to_inject == other.faults_to_inject
    }
}

impl Eq for PartialTestExecution {}

/// The realized record of one full test iteration.
#[derive(Debug, Clone, Default)]
pub struct ConcreteTestExecution {
    /// Legacy monotonic call counter, superseded by the execution index but
    /// still echoed to instrumentation libraries.
    generated_id: u32,
    executed_rpcs: HashMap<ExecutionIndex, RecordedCall>,
    /// Executed calls without their arguments, for comparisons robust to
    /// nondeterministic inputs.
    nondeterministic_executed_rpcs: HashMap<ExecutionIndex, RecordedCall>,
    faults_to_inject: HashMap<ExecutionIndex, FaultDescriptor>,
    /// Calls whose response indicated an exception.
    failed_rpcs: HashMap<ExecutionIndex, ResponsePayload>,
    first_request_seen_by_service: HashSet<String>,
}

impl ConcreteTestExecution {
    /// An empty execution: the faultless baseline run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an execution with the forced faults of a scheduled plan.
    pub fn from_partial(partial: &PartialTestExecution) -> Self {
        Self {
            faults_to_inject: partial.faults_to_inject().clone(),
            ..Self::default()
        }
    }

    /// Clone this execution's fault profile into a fresh plan.
    pub fn to_partial(&self) -> PartialTestExecution {
        PartialTestExecution {
            faults_to_inject: self.faults_to_inject.clone(),
        }
    }

    /// Record an observed call under its index, in both full and
    /// argument-free forms.  Returns the legacy generated id.
    pub fn record_call(&mut self, index: ExecutionIndex, payload: &InvocationPayload) -> u32 {
        let call = RecordedCall::from_payload(payload);
        self.nondeterministic_executed_rpcs
            .insert(index.clone(), call.without_arguments());
        self.executed_rpcs.insert(index, call);

        self.generated_id += 1;
        self.generated_id
    }

    /// Record a completion payload; only exceptions feed the failed ledger.
    pub fn record_response(&mut self, index: ExecutionIndex, payload: &ResponsePayload) {
        if payload.exception.is_some() {
            self.failed_rpcs.insert(index, payload.clone());
        }
    }

    /// Whether this execution forces a fault at `index`.
    pub fn should_fault(&self, index: &ExecutionIndex) -> bool {
        self.faults_to_inject.contains_key(index)
    }

    /// The calls observed so far.
    pub fn executed_rpcs(&self) -> &HashMap<ExecutionIndex, RecordedCall> {
        &self.executed_rpcs
    }

    /// The calls that failed with an exception.
    pub fn failed_rpcs(&self) -> &HashMap<ExecutionIndex, ResponsePayload> {
        &self.failed_rpcs
    }

    /// First-contact latch: has this service been seen this execution?
    pub fn has_seen_first_request_from_service(&self, service: &str) -> bool {
        self.first_request_seen_by_service.contains(service)
    }

    /// Mark a service as seen for this execution.
    pub fn register_first_request_from_service(&mut self, service: &str) {
        self.first_request_seen_by_service.insert(service.to_string());
    }

    /// Whether an RPC with the same module, method, and arguments was
    /// already observed, at this or any other index.  Index, vclock, and
    /// instrumentation-type never participate in the comparison.
    pub fn has_seen_rpc_under_same_or_different_index(
        &self,
        payload: &InvocationPayload,
    ) -> bool {
        let candidate = RecordedCall::from_payload(payload);
        self.executed_rpcs
            .values()
            .any(|seen| seen.same_rpc(&candidate))
    }

    /// Log every interposed RPC and every injected fault.
    pub fn log_rpcs(&self) {
        let mut message = String::from("RPCs executed and interposed:\n");
        for (index, call) in &self.executed_rpcs {
            message.push_str(&format!(
                "  {} => {}\n",
                index,
                call.method_identifier()
            ));
        }

        if self.faults_to_inject.is_empty() {
            message.push_str("no faults injected\n");
        } else {
            message.push_str("faults injected:\n");
            for (index, fault) in &self.faults_to_inject {
                // The request lookup can miss when the application is
                // nondeterministic and the index no longer matches.
                let request = self
                    .executed_rpcs
                    .get(index)
                    .map(RecordedCall::method_identifier)
                    .unwrap_or_else(|| "no request information found".to_string());
                message.push_str(&format!("  {} => {:?} => {}\n", index, fault, request));
            }
        }

        info!("{message}");
    }

    // Query matchers.  Executed calls come from this concrete execution's
    // ledger; the forced faults come from the active plan.

    /// Was a fault forced at the index of some executed call whose calling
    /// service contains `service_name`?
    pub fn was_fault_injected_on_service(
        &self,
        plan: &PartialTestExecution,
        service_name: &str,
    ) -> bool {
        self.fault_injected_matcher(plan, SearchField::Module, service_name, None)
    }

    /// As above, matching `service/method` against the call identifier.
    pub fn was_fault_injected_on_method(
        &self,
        plan: &PartialTestExecution,
        service_name: &str,
        method_name: &str,
    ) -> bool {
        let target = format!("{service_name}/{method_name}");
        self.fault_injected_matcher(plan, SearchField::MethodIdentifier, &target, None)
    }

    /// As above, with the executed call's serialized arguments required to
    /// contain `contains`.
    pub fn was_fault_injected_on_method_where_payload_contains(
        &self,
        plan: &PartialTestExecution,
        service_name: &str,
        method_name: &str,
        contains: &str,
    ) -> bool {
        let target = format!("{service_name}/{method_name}");
        self.fault_injected_matcher(plan, SearchField::MethodIdentifier, &target, Some(contains))
    }

    /// Match by exact argument serialization rather than service or method.
    pub fn was_fault_injected_on_request(
        &self,
        plan: &PartialTestExecution,
        serialized_request: &str,
    ) -> bool {
        self.executed_rpcs.iter().any(|(index, call)| {
            call.args.as_deref() == Some(serialized_request) && plan.should_fault(index)
        })
    }

    fn fault_injected_matcher(
        &self,
        plan: &PartialTestExecution,
        field: SearchField,
        target: &str,
        contains: Option<&str>,
    ) -> bool {
        for (index, call) in &self.executed_rpcs {
            let haystack = match field {
                SearchField::Module => call.module.clone(),
                SearchField::MethodIdentifier => call.method_identifier(),
            };

            if !haystack.contains(target) || !plan.should_fault(index) {
                continue;
            }

            match contains {
                None => return true,
                Some(needle) => {
                    if call.args.as_deref().is_some_and(|args| args.contains(needle)) {
                        return true;
                    }
                }
            }
        }

        false
    }
}

// Dedup contract: concrete runs are equal iff they observed the same calls
// with the same payloads and injected the same faults.
impl PartialEq for ConcreteTestExecution {
    fn eq(&self, other: &Self) -> bool {
        self.executed_rpcs == other.executed_rpcs
            && self.faults_to_inject == other.faults_to_inject
    }
}

impl Eq for ConcreteTestExecution {}

#[derive(Clone, Copy)]
enum SearchField {
    Module,
    MethodIdentifier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_index::CallSiteFragment;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn index_for(site: &str) -> ExecutionIndex {
        let mut index = ExecutionIndex::new();
        index.push(CallSiteFragment::new("test", site, "call", 0));
        index
    }

    fn payload(module: &str, method: &str, args: &str, site: &str) -> InvocationPayload {
        InvocationPayload {
            execution_index: index_for(site).serialize(),
            module: module.to_string(),
            method: method.to_string(),
            args: args.to_string(),
            instrumentation_type: None,
            vclock: None,
        }
    }

    fn unavailable() -> FaultDescriptor {
        FaultDescriptor::forced_exception(
            "StatusRuntimeException",
            BTreeMap::from([("code".to_string(), "UNAVAILABLE".to_string())]),
        )
    }

    #[test]
    fn partial_equality_covers_faults_only() {
        let mut a = PartialTestExecution::new();
        let mut b = PartialTestExecution::new();
        assert_eq!(a, b);

        a.add_fault_to_inject(index_for("a.rs:1"), unavailable());
        assert_ne!(a, b);

        b.add_fault_to_inject(index_for("a.rs:1"), unavailable());
        assert_eq!(a, b);
    }

    #[test]
    fn concrete_equality_requires_same_trace_and_faults() {
        let mut a = ConcreteTestExecution::new();
        let mut b = ConcreteTestExecution::new();

        a.record_call(index_for("a.rs:1"), &payload("svc", "get", "k=1", "a.rs:1"));
        assert_ne!(a, b);

        b.record_call(index_for("a.rs:1"), &payload("svc", "get", "k=1", "a.rs:1"));
        assert_eq!(a, b);

        let mut plan = a.to_partial();
        plan.add_fault_to_inject(index_for("a.rs:1"), unavailable());
        let c = ConcreteTestExecution::from_partial(&plan);
        assert_ne!(a, c);
    }

    #[test]
    fn from_partial_seeds_faults_and_round_trips() {
        let mut plan = PartialTestExecution::new();
        plan.add_fault_to_inject(index_for("a.rs:1"), unavailable());

        let concrete = ConcreteTestExecution::from_partial(&plan);
        assert!(concrete.should_fault(&index_for("a.rs:1")));
        assert_eq!(concrete.to_partial(), plan);
    }

    #[test]
    fn record_call_keeps_both_forms_and_counts() {
        let mut concrete = ConcreteTestExecution::new();
        let first = concrete.record_call(index_for("a.rs:1"), &payload("svc", "get", "k=1", "a.rs:1"));
        let second = concrete.record_call(index_for("b.rs:2"), &payload("svc", "put", "k=2", "b.rs:2"));
        assert_eq!((first, second), (1, 2));

        let full = &concrete.executed_rpcs()[&index_for("a.rs:1")];
        assert_eq!(full.args.as_deref(), Some("k=1"));

        let cleaned = &concrete.nondeterministic_executed_rpcs[&index_for("a.rs:1")];
        assert_eq!(cleaned.args, None);
        assert_eq!(cleaned.method, "get");
    }

    #[test]
    fn record_response_stores_exceptions_only() {
        let mut concrete = ConcreteTestExecution::new();

        let ok = ResponsePayload {
            execution_index: index_for("a.rs:1").serialize(),
            exception: None,
            instrumentation_type: None,
        };
        concrete.record_response(index_for("a.rs:1"), &ok);
        assert!(concrete.failed_rpcs().is_empty());

        let failed = ResponsePayload {
            exception: Some(json!({"name": "ConnectionError"})),
            ..ok
        };
        concrete.record_response(index_for("a.rs:1"), &failed);
        assert_eq!(concrete.failed_rpcs().len(), 1);
    }

    #[test]
    fn first_request_latch() {
        let mut concrete = ConcreteTestExecution::new();
        assert!(!concrete.has_seen_first_request_from_service("cart"));

        concrete.register_first_request_from_service("cart");
        assert!(concrete.has_seen_first_request_from_service("cart"));
        assert!(!concrete.has_seen_first_request_from_service("checkout"));
    }

    #[test]
    fn seen_rpc_comparison_ignores_index() {
        let mut concrete = ConcreteTestExecution::new();
        concrete.record_call(index_for("a.rs:1"), &payload("svc", "get", "k=1", "a.rs:1"));

        // Same RPC surfacing at a different call-graph position.
        assert!(concrete
            .has_seen_rpc_under_same_or_different_index(&payload("svc", "get", "k=1", "z.rs:9")));
        assert!(!concrete
            .has_seen_rpc_under_same_or_different_index(&payload("svc", "get", "k=2", "a.rs:1")));
    }

    #[test]
    fn query_matchers() {
        let mut concrete = ConcreteTestExecution::new();
        concrete.record_call(index_for("a.rs:1"), &payload("svc", "get", "key=user-123", "a.rs:1"));
        concrete.record_call(index_for("b.rs:2"), &payload("other", "put", "key=user-456", "b.rs:2"));

        let mut plan = PartialTestExecution::new();
        plan.add_fault_to_inject(index_for("a.rs:1"), unavailable());

        assert!(concrete.was_fault_injected_on_service(&plan, "svc"));
        assert!(!concrete.was_fault_injected_on_service(&plan, "other"));

        assert!(concrete.was_fault_injected_on_method(&plan, "svc", "get"));
        assert!(!concrete.was_fault_injected_on_method(&plan, "other", "put"));

        assert!(concrete.was_fault_injected_on_method_where_payload_contains(
            &plan, "svc", "get", "user-123"
        ));
        assert!(!concrete.was_fault_injected_on_method_where_payload_contains(
            &plan, "svc", "get", "user-456"
        ));

        assert!(concrete.was_fault_injected_on_request(&plan, "key=user-123"));
        assert!(!concrete.was_fault_injected_on_request(&plan, "key=user"));
    }
}
