//! Error types for signing group resolution.

use crate::group::{Stage, Trace};
use crate::identity::RecordKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// A supplied certificate, profile or target record is malformed.
    #[error("Invalid {kind} record #{index}: {reason}")]
    InvalidInput {
        kind: RecordKind,
        index: usize,
        reason: String,
    },

    /// No certificate covers every requested bundle identifier, before any filtering.
    #[error(
        "No certificate covers all requested bundle IDs ({}) \
         ({certificates} valid certificate(s), {profiles} profile(s) considered)",
        .bundle_ids.join(", ")
    )]
    NoCandidate {
        certificates: usize,
        profiles: usize,
        bundle_ids: Vec<String>,
    },

    /// Candidates existed but one pipeline stage eliminated all of them.
    #[error("All signing groups were eliminated by the {stage}")]
    FilteredToEmpty { stage: Stage, trace: Trace },

    #[error("No matching signing group")]
    NoMatchingGroup,

    #[error("No installer certificate available for {groups} remaining signing group(s)")]
    NoInstallerCertificate { groups: usize, trace: Trace },

    /// Only raised when the ambiguity policy is `fail`.
    #[error("Ambiguous resolution: {candidates} signing groups remain")]
    AmbiguousResolution { candidates: usize, trace: Trace },

    #[error("Unknown export method: '{0}' (expected development, ad-hoc, enterprise, app-store or none)")]
    UnknownMethod(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl ResolveError {
    /// Diagnostic trace collected up to the failing stage, when there is one.
    #[must_use]
    pub fn trace(&self) -> Option<&Trace> {
        match self {
            Self::FilteredToEmpty { trace, .. }
            | Self::NoInstallerCertificate { trace, .. }
            | Self::AmbiguousResolution { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
