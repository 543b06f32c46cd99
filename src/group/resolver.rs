//! Group resolver: installer pairing and the final deterministic pick

use super::{ResolvedGroup, SelectableGroup, Stage, StageReport, Trace};
use crate::error::{ResolveError, Result};
use crate::identity::{CertificateIdentity, DistributionMethod, IdentityStore, ProvisioningProfile};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// What to do when more than one signing group survives filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Take the first group in canonical order and report the ambiguity
    #[default]
    Warn,
    /// Refuse to pick
    Fail,
}

/// Non-fatal report that several signing groups were usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    /// Signing groups left after installer pairing
    pub candidates: usize,
    pub chosen_certificate: String,
    pub chosen_installer_certificate: Option<String>,
}

/// Ordering of two candidate profiles for the same bundle, best first.
///
/// Exact bundle ID before wildcard, longer pattern before shorter, later
/// expiration first, then name and UUID. Input order never decides.
#[must_use]
pub fn prefer_profile(a: &ProvisioningProfile, b: &ProvisioningProfile) -> Ordering {
    b.bundle_id
        .specificity()
        .cmp(&a.bundle_id.specificity())
        .then_with(|| b.expires_at.cmp(&a.expires_at))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.uuid.cmp(&b.uuid))
}

struct Candidate<'s> {
    group: SelectableGroup<'s>,
    installer: Option<&'s CertificateIdentity>,
}

pub struct GroupResolver<'s> {
    store: &'s IdentityStore,
    method: DistributionMethod,
    policy: AmbiguityPolicy,
}

impl<'s> GroupResolver<'s> {
    #[must_use]
    pub fn new(store: &'s IdentityStore, method: DistributionMethod, policy: AmbiguityPolicy) -> Self {
        Self {
            store,
            method,
            policy,
        }
    }

    /// Collapse the filtered groups into one [`ResolvedGroup`].
    ///
    /// # Errors
    /// - [`ResolveError::NoMatchingGroup`] when `groups` is empty
    /// - [`ResolveError::NoInstallerCertificate`] when no group pairs with an installer certificate
    /// - [`ResolveError::AmbiguousResolution`] when several remain under [`AmbiguityPolicy::Fail`]
    pub fn resolve(
        &self,
        groups: Vec<SelectableGroup<'s>>,
        trace: &mut Trace,
    ) -> Result<(ResolvedGroup, Option<Ambiguity>)> {
        if groups.is_empty() {
            return Err(ResolveError::NoMatchingGroup);
        }

        let candidates = self.pair_installers(groups, trace)?;

        let ambiguity = if candidates.len() > 1 {
            match self.policy {
                AmbiguityPolicy::Fail => {
                    return Err(ResolveError::AmbiguousResolution {
                        candidates: candidates.len(),
                        trace: trace.clone(),
                    });
                }
                AmbiguityPolicy::Warn => Some(candidates.len()),
            }
        } else {
            None
        };

        let Candidate { group, installer } = candidates
            .into_iter()
            .next()
            .ok_or(ResolveError::NoMatchingGroup)?;

        let mut profiles = BTreeMap::new();
        for (bundle_id, options) in group.iter() {
            let chosen = options
                .iter()
                .copied()
                .min_by(|a, b| prefer_profile(a, b))
                .ok_or(ResolveError::NoMatchingGroup)?;
            profiles.insert(bundle_id.to_string(), chosen.clone());
        }

        let resolved = ResolvedGroup {
            method: self.method,
            certificate: group.certificate().clone(),
            installer_certificate: installer.cloned(),
            profiles,
        };
        let ambiguity = ambiguity.map(|candidates| Ambiguity {
            candidates,
            chosen_certificate: resolved.certificate.common_name.clone(),
            chosen_installer_certificate: resolved
                .installer_certificate
                .as_ref()
                .map(|c| c.common_name.clone()),
        });
        Ok((resolved, ambiguity))
    }

    /// Store distribution pairs every group with the first same-team installer
    /// certificate in canonical order and drops groups without one; other
    /// methods pass groups through unpaired.
    fn pair_installers(
        &self,
        groups: Vec<SelectableGroup<'s>>,
        trace: &mut Trace,
    ) -> Result<Vec<Candidate<'s>>> {
        if !self.method.requires_installer_certificate() {
            trace.push(StageReport::skipped(Stage::InstallerPairing, &groups));
            return Ok(groups
                .into_iter()
                .map(|group| Candidate {
                    group,
                    installer: None,
                })
                .collect());
        }

        let installers = self.store.installer_certificates_by_team();
        let groups_before = groups.len();
        let candidates_before: usize = groups.iter().map(SelectableGroup::candidate_count).sum();

        let mut candidates_after = 0;
        let mut candidates = Vec::new();
        for group in groups {
            // longest-lived installer of the team; renewals do not add candidates
            let Some(installer) = installers
                .get(group.certificate().team_id.as_str())
                .and_then(|team| team.first())
            else {
                continue;
            };
            candidates_after += group.candidate_count();
            candidates.push(Candidate {
                group,
                installer: Some(*installer),
            });
        }

        trace.push(StageReport {
            stage: Stage::InstallerPairing,
            applied: true,
            groups_before,
            groups_after: candidates.len(),
            candidates_before,
            candidates_after,
        });

        if candidates.is_empty() {
            return Err(ResolveError::NoInstallerCertificate {
                groups: groups_before,
                trace: trace.clone(),
            });
        }
        Ok(candidates)
    }
}
