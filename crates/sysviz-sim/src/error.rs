//! Error types for the simulation engine.

use thiserror::Error;

/// Errors produced by the engine.
///
/// Simulated failures are state, not errors. The only fallible surface is
/// turning user-supplied names into tagged variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A name did not match any variant of the named enum.
    #[error("unknown {kind} '{value}' (expected one of: {expected})")]
    UnknownVariant {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl SimError {
    pub(crate) fn unknown(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}
