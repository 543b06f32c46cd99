//! Filter pipeline narrowing candidate signing groups
//!
//! Stages always run in the same order:
//! 1. entitlements (only when a target declares entitlements)
//! 2. export method
//! 3. team (only when a team ID is forced)
//! 4. platform-managed exclusion (only when the archive was signed manually)
//!
//! Stages never print. Each one records a [`StageReport`] into the [`Trace`]
//! handed back to the caller.

use super::SelectableGroup;
use crate::entitlements::covers;
use crate::error::{ResolveError, Result};
use crate::identity::{DistributionMethod, IdentityStore, TargetBundle};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Entitlements,
    ExportMethod,
    Team,
    NotPlatformManaged,
    InstallerPairing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Entitlements => "entitlement filter",
            Self::ExportMethod => "export-method filter",
            Self::Team => "team filter",
            Self::NotPlatformManaged => "platform-managed exclusion",
            Self::InstallerPairing => "installer pairing",
        })
    }
}

/// Group and candidate counts around one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// `false` when the stage's precondition did not hold and it passed everything through
    pub applied: bool,
    pub groups_before: usize,
    pub groups_after: usize,
    pub candidates_before: usize,
    pub candidates_after: usize,
}

impl StageReport {
    #[must_use]
    pub fn removed_groups(&self) -> usize {
        self.groups_before.saturating_sub(self.groups_after)
    }

    #[must_use]
    pub fn removed_candidates(&self) -> usize {
        self.candidates_before.saturating_sub(self.candidates_after)
    }

    pub(crate) fn skipped(stage: Stage, groups: &[SelectableGroup<'_>]) -> Self {
        let candidates = candidate_total(groups);
        Self {
            stage,
            applied: false,
            groups_before: groups.len(),
            groups_after: groups.len(),
            candidates_before: candidates,
            candidates_after: candidates,
        }
    }
}

/// Ordered record of what each stage removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    reports: Vec<StageReport>,
}

impl Trace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, report: StageReport) {
        self.reports.push(report);
    }

    #[must_use]
    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    #[must_use]
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageReport> {
        self.reports.iter()
    }
}

fn candidate_total(groups: &[SelectableGroup<'_>]) -> usize {
    groups.iter().map(SelectableGroup::candidate_count).sum()
}

/// One pipeline stage: narrows a group or drops it by returning `None`.
pub trait GroupFilter {
    fn stage(&self) -> Stage;

    fn apply<'s>(&self, group: SelectableGroup<'s>) -> Option<SelectableGroup<'s>>;
}

/// Drops profiles that do not grant every entitlement their bundle requires.
#[derive(Debug, Clone)]
pub struct EntitlementFilter {
    required: BTreeMap<String, BTreeSet<String>>,
}

impl EntitlementFilter {
    #[must_use]
    pub fn new(targets: &[TargetBundle]) -> Self {
        Self {
            required: targets
                .iter()
                .map(|t| (t.bundle_id.clone(), t.required_entitlements.clone()))
                .collect(),
        }
    }

    fn is_needed(targets: &[TargetBundle]) -> bool {
        targets.iter().any(|t| !t.required_entitlements.is_empty())
    }
}

impl GroupFilter for EntitlementFilter {
    fn stage(&self) -> Stage {
        Stage::Entitlements
    }

    fn apply<'s>(&self, group: SelectableGroup<'s>) -> Option<SelectableGroup<'s>> {
        group.retain_profiles(|bundle_id, profile| match self.required.get(bundle_id) {
            Some(required) => covers(profile, required),
            None => true,
        })
    }
}

/// Keeps profiles whose distribution type the requested method accepts.
#[derive(Debug, Clone, Copy)]
pub struct ExportMethodFilter {
    method: DistributionMethod,
}

impl ExportMethodFilter {
    #[must_use]
    pub fn new(method: DistributionMethod) -> Self {
        Self { method }
    }
}

impl GroupFilter for ExportMethodFilter {
    fn stage(&self) -> Stage {
        Stage::ExportMethod
    }

    fn apply<'s>(&self, group: SelectableGroup<'s>) -> Option<SelectableGroup<'s>> {
        group.retain_profiles(|_, profile| self.method.accepts(profile.distribution))
    }
}

/// Keeps groups whose certificate belongs to the team, and only that team's profiles.
#[derive(Debug, Clone)]
pub struct TeamFilter {
    team_id: String,
}

impl TeamFilter {
    #[must_use]
    pub fn new(team_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
        }
    }
}

impl GroupFilter for TeamFilter {
    fn stage(&self) -> Stage {
        Stage::Team
    }

    fn apply<'s>(&self, group: SelectableGroup<'s>) -> Option<SelectableGroup<'s>> {
        if !IdentityStore::is_team_member(group.certificate(), &self.team_id) {
            return None;
        }
        group.retain_profiles(|_, profile| profile.team_id == self.team_id)
    }
}

/// Drops every group that contains a platform-managed profile.
///
/// codesign rejects an export signed with a managed profile when the archive
/// was signed with a manually managed one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotPlatformManagedFilter;

impl GroupFilter for NotPlatformManagedFilter {
    fn stage(&self) -> Stage {
        Stage::NotPlatformManaged
    }

    fn apply<'s>(&self, group: SelectableGroup<'s>) -> Option<SelectableGroup<'s>> {
        let has_managed = group
            .iter()
            .any(|(_, profiles)| profiles.iter().any(|p| p.platform_managed));
        if has_managed { None } else { Some(group) }
    }
}

/// Fixed-order chain of filters; a stage whose precondition does not hold is
/// kept as a skipped slot so the trace always lists all four stages.
pub struct FilterPipeline {
    stages: Vec<(Stage, Option<Box<dyn GroupFilter>>)>,
}

impl FilterPipeline {
    #[must_use]
    pub fn new(
        targets: &[TargetBundle],
        method: DistributionMethod,
        team_id: Option<&str>,
        archived_with_managed_profile: bool,
    ) -> Self {
        let entitlements: Option<Box<dyn GroupFilter>> = EntitlementFilter::is_needed(targets)
            .then(|| Box::new(EntitlementFilter::new(targets)) as Box<dyn GroupFilter>);
        let team: Option<Box<dyn GroupFilter>> = team_id
            .filter(|id| !id.trim().is_empty())
            .map(|id| Box::new(TeamFilter::new(id.trim())) as Box<dyn GroupFilter>);
        let not_managed: Option<Box<dyn GroupFilter>> = (!archived_with_managed_profile)
            .then(|| Box::new(NotPlatformManagedFilter) as Box<dyn GroupFilter>);

        Self {
            stages: vec![
                (Stage::Entitlements, entitlements),
                (
                    Stage::ExportMethod,
                    Some(Box::new(ExportMethodFilter::new(method)) as Box<dyn GroupFilter>),
                ),
                (Stage::Team, team),
                (Stage::NotPlatformManaged, not_managed),
            ],
        }
    }

    /// Stages in execution order with whether each will run.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, bool)> + '_ {
        self.stages.iter().map(|(stage, filter)| (*stage, filter.is_some()))
    }

    /// Run every stage in order, recording one report per stage.
    ///
    /// # Errors
    /// [`ResolveError::FilteredToEmpty`] naming the stage that removed the last group.
    pub fn run<'s>(
        &self,
        mut groups: Vec<SelectableGroup<'s>>,
        trace: &mut Trace,
    ) -> Result<Vec<SelectableGroup<'s>>> {
        for (slot, filter) in &self.stages {
            let Some(filter) = filter else {
                trace.push(StageReport::skipped(*slot, &groups));
                continue;
            };
            let stage = filter.stage();

            let groups_before = groups.len();
            let candidates_before = candidate_total(&groups);
            groups = groups
                .into_iter()
                .filter_map(|group| filter.apply(group))
                .collect();
            trace.push(StageReport {
                stage,
                applied: true,
                groups_before,
                groups_after: groups.len(),
                candidates_before,
                candidates_after: candidate_total(&groups),
            });

            if groups_before > 0 && groups.is_empty() {
                return Err(ResolveError::FilteredToEmpty {
                    stage,
                    trace: trace.clone(),
                });
            }
        }
        Ok(groups)
    }
}
