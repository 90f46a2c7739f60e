use std::path::PathBuf;

use thiserror::Error;

/// Conditions the usage core reports to its callers.
///
/// Only `InvalidRangeSpec` stops a batch report; the other variants degrade to
/// a safe default (built-in pricing, zero tokens) and are surfaced as warnings.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("invalid range spec '{spec}': expected all, today, yesterday, this-week, last-week, this-month, last-month or YYYY-MM-DD:YYYY-MM-DD")]
    InvalidRangeSpec { spec: String },

    #[error("malformed pricing override {}: {reason}", path.display())]
    MalformedPricingOverride { path: PathBuf, reason: String },

    #[error("session {session} has a model response without {fields}")]
    MissingTokenFields { session: String, fields: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
