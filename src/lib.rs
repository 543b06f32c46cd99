//! Signing group resolution for archive export
//!
//! Given the installed signing certificates, installer certificates and
//! provisioning profiles, pick one certificate and one profile per target
//! bundle for a requested distribution method. The engine is pure: it does
//! no I/O and reports what each stage removed as a [`Trace`].

#[macro_use]
pub mod output;

pub mod config;
pub mod engine;
pub mod entitlements;
pub mod error;
pub mod export_options;
pub mod group;
pub mod identity;

// Re-export common types
pub use config::ResolveConfig;
pub use engine::{resolve, ExportMethod, Outcome, Resolution, ResolveRequest};
pub use error::{ResolveError, Result};
pub use export_options::ExportOptions;
pub use group::{Ambiguity, AmbiguityPolicy, ResolvedGroup, Stage, StageReport, Trace};
pub use identity::{
    load_targets, BundlePattern, CertificateIdentity, DistributionMethod, Fingerprint,
    IdentityDocument, IdentityStore, ProvisioningProfile, TargetBundle, TargetDocument,
};
