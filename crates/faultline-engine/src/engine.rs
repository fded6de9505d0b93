//! The exploration engine — breadth-first search over fault-injection plans.
//!
//! One engine coordinates one exploration session at a time.  Its life
//! cycle has three informal states:
//!
//! - **Executing** — a concrete execution is staged and a test iteration is
//!   running; `begin_invocation` records calls and expands the frontier.
//! - **Draining** — the unexplored queue is empty and the last iteration is
//!   being finalized.
//! - **Idle** — no execution is staged; exploration is complete, and the
//!   only valid calls are queries (which answer `false`) and
//!   `has_next_iteration` (which answers `false`).
//!
//! The calls the engine receives originate from concurrently executing RPC
//! chains within a single iteration, so all state lives behind one coarse
//! lock: enqueue-if-absent is atomic, which is what preserves the
//! no-duplicate-variant invariant under concurrent discovery.
//!
//! Exhausting the unexplored queue is the only termination path.  A
//! configuration that keeps generating novel variants explores forever;
//! iteration-level timeouts are the harness's responsibility.

use crate::execution::{ConcreteTestExecution, PartialTestExecution};
use crate::summary::ExplorationSummary;
use faultline_analysis::AnalysisConfigurationFile;
use faultline_index::{ExecutionIndex, IndexError};
use faultline_protocol::{
    EndInvocationAck, FaultDecision, FaultDescriptor, InvocationPayload, ResponsePayload,
};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors from the exploration engine.
///
/// These are fatal programmer errors: they mean the surrounding
/// instrumentation is miswired, and must abort the current test run rather
/// than be swallowed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no active concrete execution — begin_invocation before an iteration was staged")]
    NoActiveExecution,

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Behavior flags for an exploration session.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Restrict frontier expansion to single-fault variants: a candidate
    /// already carrying two or more forced faults is silently dropped.
    /// Depth can still accumulate across iterations, one fault at a time.
    pub suppress_combinations: bool,
}

#[derive(Default)]
struct EngineState {
    /// Breadth-first frontier: plans discovered but not yet realized.
    unexplored: VecDeque<PartialTestExecution>,
    /// Plans already realized, by faults-only equality.
    explored_partials: Vec<PartialTestExecution>,
    /// Runs already realized, by full trace-plus-faults equality.
    explored_concretes: Vec<ConcreteTestExecution>,
    /// The plan whose faults are being forced this iteration.
    current_partial: Option<PartialTestExecution>,
    /// The realized record of the running iteration.
    current_concrete: Option<ConcreteTestExecution>,
    analysis: Option<AnalysisConfigurationFile>,
    summary: ExplorationSummary,
}

/// The exploration engine.
///
/// A fresh engine stages an empty concrete execution — the faultless
/// baseline run that seeds the search.  Collaborators that cannot be handed
/// the engine at construction time should receive it as a
/// [`InvocationListener`] trait object from the composition root; there is
/// deliberately no ambient global instance.
pub struct ExplorationEngine {
    config: EngineConfig,
    state: Mutex<EngineState>,
}

impl ExplorationEngine {
    /// Create an engine with the baseline execution staged.
    pub fn new(config: EngineConfig) -> Self {
        let state = EngineState {
            current_concrete: Some(ConcreteTestExecution::new()),
            ..EngineState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Load the analysis policy driving fault-variant generation.
    pub fn load_analysis_configuration(&self, file: AnalysisConfigurationFile) {
        info!(
            "loaded analysis configuration with {} rules",
            file.configurations().len()
        );
        self.lock().analysis = Some(file);
    }

    /// Record an outbound call and decide whether to inject a fault.
    ///
    /// Records the call into the current concrete execution, expands the
    /// frontier from the analysis configuration, and returns the fault the
    /// active plan demands at this index, if any.
    pub fn begin_invocation(
        &self,
        payload: &InvocationPayload,
    ) -> Result<FaultDecision, EngineError> {
        let index = ExecutionIndex::deserialize(&payload.execution_index)?;
        debug!("begin_invocation at {index}");

        let mut state = self.lock();

        let concrete = state
            .current_concrete
            .as_mut()
            .ok_or(EngineError::NoActiveExecution)?;
        let generated_id = concrete.record_call(index.clone(), payload);

        if state.analysis.is_some() {
            self.generate_faults_using_analysis_configuration(
                &mut state,
                &index,
                &payload.module,
                &payload.method_identifier(),
            );
        }

        let fault = state
            .current_partial
            .as_ref()
            .and_then(|plan| plan.fault_at(&index))
            .cloned();

        if let Some(fault) = &fault {
            info!("begin_invocation injecting fault at {index}: {fault:?}");
        }

        Ok(FaultDecision {
            generated_id,
            fault,
        })
    }

    /// Acknowledge a completed call.  Echoes the execution index back and
    /// mutates no fault state.
    pub fn end_invocation(
        &self,
        payload: &InvocationPayload,
    ) -> Result<EndInvocationAck, EngineError> {
        let index = ExecutionIndex::deserialize(&payload.execution_index)?;
        debug!("end_invocation at {index}");

        Ok(EndInvocationAck {
            execution_index: payload.execution_index.clone(),
        })
    }

    /// Record a completion payload; responses carrying an exception feed
    /// the failed-RPC ledger.
    pub fn record_invocation_complete(
        &self,
        payload: &ResponsePayload,
    ) -> Result<(), EngineError> {
        let index = ExecutionIndex::deserialize(&payload.execution_index)?;

        let mut state = self.lock();
        let concrete = state
            .current_concrete
            .as_mut()
            .ok_or(EngineError::NoActiveExecution)?;
        concrete.record_response(index, payload);
        Ok(())
    }

    /// First-contact latch: true exactly once per concrete execution per
    /// distinct calling service.  Collaborators use this to decide when to
    /// reset per-service causality state.
    pub fn is_new_test_execution(&self, service_name: &str) -> bool {
        let mut state = self.lock();
        match state.current_concrete.as_mut() {
            // Without a staged execution no tests will run, so the answer
            // is irrelevant; false keeps the latch semantics total.
            None => false,
            Some(concrete) => {
                if concrete.has_seen_first_request_from_service(service_name) {
                    false
                } else {
                    concrete.register_first_request_from_service(service_name);
                    true
                }
            }
        }
    }

    /// Whether another iteration is staged.
    pub fn has_next_iteration(&self) -> bool {
        self.lock().current_concrete.is_some()
    }

    /// Retire the finished iteration and stage the next plan, FIFO.
    ///
    /// The sole serialization point between iterations; the harness must
    /// call it exactly once per completed iteration.
    pub fn teardowns_completed(&self) {
        let mut state = self.lock();

        let Some(concrete) = state.current_concrete.take() else {
            // Empty iterations: the harness ran more slots than there were
            // executions to explore.
            debug!("teardowns_completed with no active execution");
            return;
        };

        if let Some(partial) = state.current_partial.take() {
            state.summary.partial_executions_attempted += 1;

            if state.explored_partials.contains(&partial) {
                warn!(
                    "retired partial execution already present in the explored set; \
                     this could indicate a scheduling problem"
                );
            } else {
                state.summary.partial_executions_executed += 1;
                state.explored_partials.push(partial);
            }
        }

        state.summary.concrete_executions_executed += 1;
        if state.explored_concretes.contains(&concrete) {
            // A rerun realizing an identical trace and fault profile counts,
            // but is not novel.
            debug!("retired concrete execution duplicates an explored run");
        } else {
            state.summary.unique_concrete_executions_executed += 1;
            state.explored_concretes.push(concrete);
        }

        if let Some(next) = state.unexplored.pop_front() {
            info!(
                "scheduling next test execution ({} forced faults, {} still queued)",
                next.fault_count(),
                state.unexplored.len()
            );
            state.current_concrete = Some(ConcreteTestExecution::from_partial(&next));
            state.current_partial = Some(next);
        } else {
            info!("unexplored queue empty; exploration complete");
        }
    }

    /// Log the realized RPC ledger and the running summary for a finished
    /// iteration.
    pub fn complete_iteration(&self, current_iteration: u32) -> Result<(), EngineError> {
        info!("iteration {current_iteration} complete");

        let state = self.lock();
        let concrete = state
            .current_concrete
            .as_ref()
            .ok_or(EngineError::NoActiveExecution)?;
        concrete.log_rpcs();
        state.summary.log();
        Ok(())
    }

    /// Number of plans waiting in the unexplored queue.
    pub fn pending_executions(&self) -> usize {
        self.lock().unexplored.len()
    }

    /// Snapshot of the running counters.
    pub fn summary(&self) -> ExplorationSummary {
        self.lock().summary.clone()
    }

    // Queries.  All answer over the active plan and the current concrete
    // trace; with no active execution the defined answer is false.

    /// Was any fault forced by the active plan?
    pub fn was_fault_injected(&self) -> bool {
        self.lock()
            .current_partial
            .as_ref()
            .is_some_and(PartialTestExecution::was_fault_injected)
    }

    /// Was a fault forced on a call from a service whose name contains
    /// `service_name`?
    pub fn was_fault_injected_on_service(&self, service_name: &str) -> bool {
        let state = self.lock();
        match (&state.current_partial, &state.current_concrete) {
            (Some(plan), Some(concrete)) => {
                concrete.was_fault_injected_on_service(plan, service_name)
            }
            _ => false,
        }
    }

    /// Was a fault forced on a call whose identifier contains
    /// `service_name/method_name`?
    pub fn was_fault_injected_on_method(&self, service_name: &str, method_name: &str) -> bool {
        let state = self.lock();
        match (&state.current_partial, &state.current_concrete) {
            (Some(plan), Some(concrete)) => {
                concrete.was_fault_injected_on_method(plan, service_name, method_name)
            }
            _ => false,
        }
    }

    /// As [`was_fault_injected_on_method`](Self::was_fault_injected_on_method),
    /// with the call's serialized arguments required to contain `contains`.
    pub fn was_fault_injected_on_method_where_payload_contains(
        &self,
        service_name: &str,
        method_name: &str,
        contains: &str,
    ) -> bool {
        let state = self.lock();
        match (&state.current_partial, &state.current_concrete) {
            (Some(plan), Some(concrete)) => concrete
                .was_fault_injected_on_method_where_payload_contains(
                    plan,
                    service_name,
                    method_name,
                    contains,
                ),
            _ => false,
        }
    }

    /// Was a fault forced on a call whose serialized arguments equal
    /// `serialized_request` exactly?
    pub fn was_fault_injected_on_request(&self, serialized_request: &str) -> bool {
        let state = self.lock();
        match (&state.current_partial, &state.current_concrete) {
            (Some(plan), Some(concrete)) => {
                concrete.was_fault_injected_on_request(plan, serialized_request)
            }
            _ => false,
        }
    }

    // ── Internal ────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expand the frontier: for every rule matching this call, schedule one
    /// candidate plan per exception fault, and one per error fault type
    /// whose service pattern matches the calling service.
    fn generate_faults_using_analysis_configuration(
        &self,
        state: &mut EngineState,
        index: &ExecutionIndex,
        service_name: &str,
        method_identifier: &str,
    ) {
        // Collect candidates first: the analysis borrow must end before the
        // queues are mutated.
        let mut candidates: Vec<FaultDescriptor> = Vec::new();

        if let Some(analysis) = &state.analysis {
            for configuration in analysis.configurations() {
                if !configuration.is_pattern_match(method_identifier) {
                    continue;
                }

                candidates.extend(configuration.exception_fault_objects());

                for rule in configuration.errors() {
                    if rule.matches_service(service_name) {
                        candidates.extend(rule.types().iter().cloned());
                    }
                }
            }
        }

        for fault in candidates {
            self.create_and_schedule_partial_execution(state, index, fault);
        }
    }

    /// Clone the current concrete execution into a plan carrying one more
    /// forced fault, and enqueue it if it is genuinely new: absent from the
    /// explored set, the unexplored queue, and the current plan.
    fn create_and_schedule_partial_execution(
        &self,
        state: &mut EngineState,
        index: &ExecutionIndex,
        fault: FaultDescriptor,
    ) {
        let Some(concrete) = state.current_concrete.as_ref() else {
            return;
        };

        let mut candidate = concrete.to_partial();
        candidate.add_fault_to_inject(index.clone(), fault);

        let already_explored = state.explored_partials.contains(&candidate);
        let already_scheduled = state.unexplored.contains(&candidate);
        let is_current = state.current_partial.as_ref() == Some(&candidate);

        if already_explored || already_scheduled || is_current {
            return;
        }

        if self.config.suppress_combinations && candidate.fault_count() > 1 {
            debug!(
                "not scheduling candidate with {} faults: combinations suppressed",
                candidate.fault_count()
            );
            return;
        }

        info!(
            "scheduling new partial execution ({} forced faults)",
            candidate.fault_count()
        );
        state.unexplored.push_back(candidate);
    }
}

/// The narrow interface handed to the RPC interception layer.
///
/// Interceptors receive this at construction time from the composition
/// root instead of reaching for a process-wide singleton.
pub trait InvocationListener: Send + Sync {
    fn begin_invocation(&self, payload: &InvocationPayload) -> Result<FaultDecision, EngineError>;
    fn end_invocation(&self, payload: &InvocationPayload)
        -> Result<EndInvocationAck, EngineError>;
    fn record_invocation_complete(&self, payload: &ResponsePayload) -> Result<(), EngineError>;
    fn is_new_test_execution(&self, service_name: &str) -> bool;
}

impl InvocationListener for ExplorationEngine {
    fn begin_invocation(&self, payload: &InvocationPayload) -> Result<FaultDecision, EngineError> {
        ExplorationEngine::begin_invocation(self, payload)
    }

    fn end_invocation(
        &self,
        payload: &InvocationPayload,
    ) -> Result<EndInvocationAck, EngineError> {
        ExplorationEngine::end_invocation(self, payload)
    }

    fn record_invocation_complete(&self, payload: &ResponsePayload) -> Result<(), EngineError> {
        ExplorationEngine::record_invocation_complete(self, payload)
    }

    fn is_new_test_execution(&self, service_name: &str) -> bool {
        ExplorationEngine::is_new_test_execution(self, service_name)
    }
}
