//! Signing group construction, filtering and resolution
//!
//! - `builder` - one candidate group per certificate that covers every target
//! - `filter` - the fixed-order filter pipeline and its diagnostic trace
//! - `resolver` - installer pairing, profile tie-breaks and the final pick

mod builder;
mod filter;
mod resolver;

pub use builder::{build_groups, BuildSummary};
pub use filter::{
    EntitlementFilter, ExportMethodFilter, FilterPipeline, GroupFilter, NotPlatformManagedFilter,
    Stage, StageReport, TeamFilter, Trace,
};
pub use resolver::{prefer_profile, Ambiguity, AmbiguityPolicy, GroupResolver};

use crate::identity::{CertificateIdentity, DistributionMethod, ProvisioningProfile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Profiles usable with one specific certificate, per target bundle ID.
///
/// Created by [`build_groups`] and only narrowed by pipeline stages; every bundle
/// keeps at least one profile or the whole group is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableGroup<'s> {
    certificate: &'s CertificateIdentity,
    profiles: BTreeMap<String, Vec<&'s ProvisioningProfile>>,
}

impl<'s> SelectableGroup<'s> {
    pub(crate) fn new(
        certificate: &'s CertificateIdentity,
        profiles: BTreeMap<String, Vec<&'s ProvisioningProfile>>,
    ) -> Self {
        Self {
            certificate,
            profiles,
        }
    }

    #[must_use]
    pub fn certificate(&self) -> &'s CertificateIdentity {
        self.certificate
    }

    pub fn bundle_ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    #[must_use]
    pub fn profiles_for(&self, bundle_id: &str) -> &[&'s ProvisioningProfile] {
        self.profiles.get(bundle_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[&'s ProvisioningProfile])> {
        self.profiles
            .iter()
            .map(|(bundle_id, profiles)| (bundle_id.as_str(), profiles.as_slice()))
    }

    /// Number of (bundle, profile) candidate entries in this group.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.profiles.values().map(Vec::len).sum()
    }

    /// Keep the profiles accepted by `keep`; `None` once any bundle runs empty.
    pub(crate) fn retain_profiles<F>(mut self, mut keep: F) -> Option<Self>
    where
        F: FnMut(&str, &ProvisioningProfile) -> bool,
    {
        for (bundle_id, profiles) in &mut self.profiles {
            profiles.retain(|profile| keep(bundle_id, profile));
            if profiles.is_empty() {
                return None;
            }
        }
        Some(self)
    }
}

impl fmt::Display for SelectableGroup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "certificate: {}", self.certificate)?;
        for (bundle_id, profiles) in &self.profiles {
            writeln!(f, "  {bundle_id}:")?;
            for profile in profiles {
                writeln!(f, "    - {profile}")?;
            }
        }
        Ok(())
    }
}

/// Final signing configuration: one certificate and exactly one profile per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedGroup {
    pub method: DistributionMethod,
    pub certificate: CertificateIdentity,
    pub installer_certificate: Option<CertificateIdentity>,
    pub profiles: BTreeMap<String, ProvisioningProfile>,
}

impl ResolvedGroup {
    /// Bundle ID to profile name, the shape export options expect.
    #[must_use]
    pub fn bundle_profile_names(&self) -> BTreeMap<&str, &str> {
        self.profiles
            .iter()
            .map(|(bundle_id, profile)| (bundle_id.as_str(), profile.name.as_str()))
            .collect()
    }

    /// Team of the signing certificate.
    #[must_use]
    pub fn team_id(&self) -> &str {
        &self.certificate.team_id
    }
}

impl fmt::Display for ResolvedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method: {}", self.method)?;
        writeln!(f, "certificate: {}", self.certificate)?;
        if let Some(installer) = &self.installer_certificate {
            writeln!(f, "installer certificate: {installer}")?;
        }
        for (bundle_id, profile) in &self.profiles {
            writeln!(f, "  {bundle_id} -> {profile}")?;
        }
        Ok(())
    }
}
