//! Probe definitions as stored, and the resolved form handed to the invoker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::probe::error::ProbeError;
use crate::probe::literal::{parse_arguments, ProbeLiteral};

pub const DEFAULT_CALL_ARGUMENTS: &str = "()";
pub const DEFAULT_PRE_DELAY_SECONDS: i64 = 1;
pub const DEFAULT_POST_DELAY_SECONDS: i64 = 3;
pub const DEFAULT_SCALE_FACTOR: f64 = -25.0;

/// A single `load_probes` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDefinition {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub priority: i64,
    pub target_function: String,
    pub call_arguments: String,
    pub pre_delay_seconds: i64,
    pub post_delay_seconds: i64,
    pub scale_factor: f64,
    pub debug_logging: bool,
}

/// Field values for creating or replacing a probe definition.
///
/// `priority: None` means "append after the last probe" on create and
/// "keep the stored priority" on update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeDraft {
    pub name: String,
    pub active: bool,
    pub priority: Option<i64>,
    pub target_function: String,
    pub call_arguments: String,
    pub pre_delay_seconds: i64,
    pub post_delay_seconds: i64,
    pub scale_factor: f64,
    pub debug_logging: bool,
}

impl ProbeDraft {
    /// A draft with the stock defaults for everything but name and function.
    pub fn new(name: impl Into<String>, target_function: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            priority: None,
            target_function: target_function.into(),
            call_arguments: DEFAULT_CALL_ARGUMENTS.to_string(),
            pre_delay_seconds: DEFAULT_PRE_DELAY_SECONDS,
            post_delay_seconds: DEFAULT_POST_DELAY_SECONDS,
            scale_factor: DEFAULT_SCALE_FACTOR,
            debug_logging: false,
        }
    }
}

impl From<&ProbeDefinition> for ProbeDraft {
    fn from(definition: &ProbeDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            active: definition.active,
            priority: Some(definition.priority),
            target_function: definition.target_function.clone(),
            call_arguments: definition.call_arguments.clone(),
            pre_delay_seconds: definition.pre_delay_seconds,
            post_delay_seconds: definition.post_delay_seconds,
            scale_factor: definition.scale_factor,
            debug_logging: definition.debug_logging,
        }
    }
}

/// The active probe with its call arguments already parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProbe {
    pub id: i64,
    pub name: String,
    pub target_function: String,
    pub arguments: Vec<ProbeLiteral>,
    #[serde(serialize_with = "serialize_seconds")]
    pub pre_delay: Duration,
    #[serde(serialize_with = "serialize_seconds")]
    pub post_delay: Duration,
    pub scale_factor: f64,
    pub debug_logging: bool,
}

impl ResolvedProbe {
    /// Parse `definition`'s arguments. Negative delays are treated as zero.
    pub fn resolve(definition: &ProbeDefinition) -> Result<Self, ProbeError> {
        Ok(Self {
            id: definition.id,
            name: definition.name.clone(),
            target_function: definition.target_function.clone(),
            arguments: parse_arguments(&definition.call_arguments)?,
            pre_delay: seconds(definition.pre_delay_seconds),
            post_delay: seconds(definition.post_delay_seconds),
            scale_factor: definition.scale_factor,
            debug_logging: definition.debug_logging,
        })
    }
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

fn serialize_seconds<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(value.as_secs())
}
