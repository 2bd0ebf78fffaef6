//! Load Probe Module
//!
//! A load probe names a database function whose result tells the job
//! admission loop how much work may currently proceed. This module holds
//! the probe data model, the call-argument literal syntax, result
//! normalization and the invoker that runs probe functions.

pub mod error;
pub mod invoker;
pub mod literal;
pub mod types;
pub mod value;

pub use error::{ProbeError, TriggerError};
pub use invoker::{Capability, ProbeInvoker};
pub use literal::ProbeLiteral;
pub use types::{ProbeDefinition, ProbeDraft, ResolvedProbe};
pub use value::{ProbeRow, ProbeValue};
