//! Analysis configuration for faultline's fault-variant generation.
//!
//! An analysis configuration is the declarative policy for one test: which
//! call sites are interesting (a regex over the `module/method` identifier)
//! and which candidate faults to try there.  The exploration engine consults
//! the active [`AnalysisConfigurationFile`] on every intercepted call to
//! expand its search frontier.
//!
//! Two rule kinds exist:
//!
//! - **exceptions** apply unconditionally once the method pattern matches;
//! - **errors** are additionally scoped to calling services whose name
//!   matches the rule's case-insensitive `service_name` pattern.
//!
//! Configurations are built programmatically via
//! [`AnalysisConfigurationBuilder`] or ingested from a structured JSON
//! document via [`AnalysisConfigurationFile::from_document`].

mod configuration;
mod document;

pub use configuration::{AnalysisConfiguration, AnalysisConfigurationBuilder, ErrorRule};
pub use document::{AnalysisConfigurationFile, AnalysisError};
