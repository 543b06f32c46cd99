//! Resolution entry point
//!
//! One call is a pure function of the identity store and the request: the
//! candidate builder, the filter pipeline and the resolver run in sequence
//! with no I/O and no shared state. Failures at any stage end the call.

use crate::error::{ResolveError, Result};
use crate::group::{
    build_groups, Ambiguity, AmbiguityPolicy, BuildSummary, FilterPipeline, GroupResolver,
    ResolvedGroup, Trace,
};
use crate::identity::{check_targets, DistributionMethod, IdentityStore, TargetBundle};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Requested export: re-sign for a distribution channel, or leave signing alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMethod {
    NoResign,
    Distribute(DistributionMethod),
}

impl FromStr for ExportMethod {
    type Err = ResolveError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Distribute(DistributionMethod::Development)),
            "ad-hoc" | "adhoc" => Ok(Self::Distribute(DistributionMethod::AdHoc)),
            "enterprise" => Ok(Self::Distribute(DistributionMethod::Enterprise)),
            "app-store" | "appstore" => Ok(Self::Distribute(DistributionMethod::AppStore)),
            "none" | "no-resign" => Ok(Self::NoResign),
            _ => Err(ResolveError::UnknownMethod(value.to_string())),
        }
    }
}

impl fmt::Display for ExportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResign => f.write_str("none"),
            Self::Distribute(method) => write!(f, "{method}"),
        }
    }
}

/// Everything one resolution needs besides the identity store.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub targets: Vec<TargetBundle>,
    pub method: ExportMethod,
    /// Forced team; `None` keeps every team
    pub team_id: Option<String>,
    /// Whether the archive was signed with a platform-managed profile
    pub archived_with_managed_profile: bool,
    pub ambiguity: AmbiguityPolicy,
}

impl ResolveRequest {
    #[must_use]
    pub fn new(targets: Vec<TargetBundle>, method: ExportMethod) -> Self {
        Self {
            targets,
            method,
            team_id: None,
            archived_with_managed_profile: false,
            ambiguity: AmbiguityPolicy::default(),
        }
    }

    #[must_use]
    pub fn team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    #[must_use]
    pub fn archived_with_managed_profile(mut self, managed: bool) -> Self {
        self.archived_with_managed_profile = managed;
        self
    }

    #[must_use]
    pub fn ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity = policy;
        self
    }
}

/// A successful resolution and the diagnostics gathered on the way.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub group: ResolvedGroup,
    pub summary: BuildSummary,
    pub trace: Trace,
    pub ambiguity: Option<Ambiguity>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// The export keeps the archive's signing; nothing was resolved
    NotResigned,
    Resolved(Resolution),
}

/// Resolve the signing group for `request` against `store`.
///
/// # Errors
/// - [`ResolveError::InvalidInput`] for an empty, duplicated or wildcard target list
/// - [`ResolveError::NoCandidate`] when no certificate covers every target
/// - [`ResolveError::FilteredToEmpty`] naming the stage that removed the last group
/// - [`ResolveError::NoInstallerCertificate`] for store distribution without installer certificate
/// - [`ResolveError::AmbiguousResolution`] under [`AmbiguityPolicy::Fail`]
pub fn resolve(store: &IdentityStore, request: &ResolveRequest) -> Result<Outcome> {
    let method = match request.method {
        ExportMethod::NoResign => return Ok(Outcome::NotResigned),
        ExportMethod::Distribute(method) => method,
    };
    check_targets(&request.targets)?;

    let (groups, summary) = build_groups(store, &request.targets);
    if groups.is_empty() {
        return Err(ResolveError::NoCandidate {
            certificates: summary.certificates,
            profiles: summary.profiles,
            bundle_ids: request
                .targets
                .iter()
                .map(|t| t.bundle_id.clone())
                .collect(),
        });
    }

    let mut trace = Trace::new();
    let pipeline = FilterPipeline::new(
        &request.targets,
        method,
        request.team_id.as_deref(),
        request.archived_with_managed_profile,
    );
    let groups = pipeline.run(groups, &mut trace)?;

    let resolver = GroupResolver::new(store, method, request.ambiguity);
    let (group, ambiguity) = resolver.resolve(groups, &mut trace)?;

    Ok(Outcome::Resolved(Resolution {
        group,
        summary,
        trace,
        ambiguity,
    }))
}
