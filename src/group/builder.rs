//! Candidate group builder

use super::SelectableGroup;
use crate::identity::{IdentityStore, TargetBundle};
use serde::Serialize;
use std::collections::BTreeMap;

/// What the builder looked at and what it produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub certificates: usize,
    pub profiles: usize,
    pub groups: usize,
}

/// One group per valid certificate that has a matching, certificate-signed
/// profile for every target. Certificates missing any target are dropped here.
///
/// Groups come out in the store's canonical certificate order.
pub fn build_groups<'s>(
    store: &'s IdentityStore,
    targets: &[TargetBundle],
) -> (Vec<SelectableGroup<'s>>, BuildSummary) {
    let certificates = store.valid_certificates();
    let mut groups = Vec::new();

    'certificates: for certificate in certificates {
        let mut profiles = BTreeMap::new();
        for target in targets {
            let matching: Vec<_> = store
                .profiles_for_bundle(&target.bundle_id)
                .filter(|profile| profile.is_signed_by(certificate))
                .collect();
            if matching.is_empty() {
                continue 'certificates;
            }
            profiles.insert(target.bundle_id.clone(), matching);
        }
        groups.push(SelectableGroup::new(certificate, profiles));
    }

    let summary = BuildSummary {
        certificates: certificates.len(),
        profiles: store.profiles().len(),
        groups: groups.len(),
    };
    (groups, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{
        BundlePattern, CertificateIdentity, DistributionMethod, Fingerprint, ProvisioningProfile,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn cert(name: &str, fp: &str) -> CertificateIdentity {
        CertificateIdentity {
            common_name: name.to_string(),
            serial: fp.to_string(),
            team_id: "TEAM123456".to_string(),
            team_name: "Acme".to_string(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            has_private_key: true,
            fingerprint: Fingerprint::from_hex(fp).unwrap(),
        }
    }

    fn profile(uuid: &str, pattern: &str, signers: &[&str]) -> ProvisioningProfile {
        ProvisioningProfile {
            name: uuid.to_string(),
            uuid: uuid.to_string(),
            team_id: "TEAM123456".to_string(),
            team_name: "Acme".to_string(),
            bundle_id: BundlePattern::parse(pattern).unwrap(),
            distribution: DistributionMethod::Development,
            certificates: signers
                .iter()
                .map(|fp| Fingerprint::from_hex(fp).unwrap())
                .collect(),
            devices: BTreeSet::new(),
            entitlements: BTreeSet::new(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            platform_managed: false,
        }
    }

    #[test]
    fn drops_certificates_that_miss_a_target() {
        let store = IdentityStore::from_parts(
            vec![cert("Full", "AA"), cert("Partial", "BB")],
            vec![],
            vec![
                profile("app-aa", "com.acme.app", &["AA"]),
                profile("ext-aa", "com.acme.app.ext", &["AA"]),
                profile("app-bb", "com.acme.app", &["BB"]),
            ],
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let targets = vec![
            TargetBundle::new("com.acme.app", Vec::<String>::new()),
            TargetBundle::new("com.acme.app.ext", Vec::<String>::new()),
        ];

        let (groups, summary) = build_groups(&store, &targets);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].certificate().common_name, "Full");
        assert_eq!(
            summary,
            BuildSummary { certificates: 2, profiles: 3, groups: 1 }
        );
    }

    #[test]
    fn profiles_must_embed_the_certificate() {
        let store = IdentityStore::from_parts(
            vec![cert("Dev", "AA")],
            vec![],
            vec![
                profile("wild", "com.acme.*", &["AA", "CC"]),
                profile("other", "com.acme.app", &["CC"]),
            ],
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let targets = vec![TargetBundle::new("com.acme.app", Vec::<String>::new())];

        let (groups, _) = build_groups(&store, &targets);
        let uuids: Vec<_> = groups[0]
            .profiles_for("com.acme.app")
            .iter()
            .map(|p| p.uuid.as_str())
            .collect();
        assert_eq!(uuids, vec!["wild"]);
        assert_eq!(groups[0].candidate_count(), 1);
    }
}
