//! Fault-injection exploration engine for Faultline.
//!
//! This crate implements the core search loop that makes Faultline useful
//! for microservice resilience testing:
//!
//! 1. **Record** every intercepted RPC of the running test iteration,
//!    keyed by its execution index
//! 2. **Expand** the search frontier by pairing each observed call with the
//!    fault variants an analysis configuration says apply to it
//! 3. **Replay** the functional test once per queued variant, forcing the
//!    planned faults at the exact call sites they were discovered at
//!
//! # Architecture
//!
//! The loop works like systematic state-space search applied to RPC fault
//! injection:
//!
//! ```text
//! 1. Run the functional test once, fault-free → the baseline execution
//! 2. For each RPC observed, for each matching analysis rule, derive a
//!    variant plan: "this execution, plus one forced fault at this call"
//! 3. Enqueue each variant exactly once (FIFO, deduplicated by fault plan)
//! 4. Re-run the test under the next queued plan; observing new RPCs in a
//!    faulted run may discover deeper variants
//! 5. Repeat until the queue is empty
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use faultline_engine::{EngineConfig, ExplorationEngine};
//! use faultline_engine::summary::format_summary;
//!
//! let engine = ExplorationEngine::new(EngineConfig::default());
//!
//! while engine.has_next_iteration() {
//!     // run the functional test; interceptors call begin_invocation /
//!     // end_invocation on the engine for every RPC
//!     engine.teardowns_completed();
//! }
//!
//! println!("{}", format_summary(&engine.summary()));
//! ```
//!
//! # Module Structure
//!
//! - [`execution`] — Partial (planned) and concrete (realized) executions
//! - [`engine`] — The exploration loop and invocation entry points
//! - [`summary`] — Session counters and reports
//!
//! # Concurrency
//!
//! RPC chains within one iteration run concurrently, so every entry point
//! is safe to call from multiple threads; iteration boundaries
//! (`teardowns_completed`) are the caller's single serialization point.

pub mod engine;
pub mod execution;
pub mod summary;

pub use engine::{EngineConfig, EngineError, ExplorationEngine, InvocationListener};
pub use execution::{ConcreteTestExecution, PartialTestExecution};
pub use summary::{format_summary, ExplorationSummary};
