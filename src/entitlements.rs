//! Entitlement capability checks
//!
//! Only the presence of an entitlement key is compared. Values differ between
//! profile and binary (for example `aps-environment` or team-prefixed keychain
//! groups) and are not part of the capability match.

use crate::identity::ProvisioningProfile;
use std::collections::BTreeSet;

/// True iff the profile grants every key in `required`.
#[must_use]
pub fn covers(profile: &ProvisioningProfile, required: &BTreeSet<String>) -> bool {
    required.is_subset(&profile.entitlements)
}

/// Required keys the profile does not grant, in sorted order.
#[must_use]
pub fn missing<'r>(
    profile: &'r ProvisioningProfile,
    required: &'r BTreeSet<String>,
) -> Vec<&'r str> {
    required
        .difference(&profile.entitlements)
        .map(String::as_str)
        .collect()
}
