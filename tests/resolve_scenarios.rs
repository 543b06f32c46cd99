use chrono::{DateTime, TimeZone, Utc};
use kodegen_bundler_signgroup::{
    load_targets, resolve, AmbiguityPolicy, DistributionMethod, ExportMethod, ExportOptions,
    IdentityDocument, IdentityStore, Outcome, Resolution, ResolveError, ResolveRequest, Stage,
    TargetBundle, TargetDocument,
};
use serde_json::{json, Value};

const TEAM: &str = "ACME123456";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn certificate(name: &str, fingerprint: &str, expires: &str) -> Value {
    json!({
        "common_name": name,
        "serial": fingerprint,
        "team_id": TEAM,
        "team_name": "Acme Inc",
        "expires_at": expires,
        "has_private_key": true,
        "fingerprint": fingerprint,
    })
}

fn profile(name: &str, uuid: &str, bundle_id: &str, kind: &str, certs: &[&str]) -> Value {
    json!({
        "name": name,
        "uuid": uuid,
        "team_id": TEAM,
        "bundle_id": bundle_id,
        "distribution_type": kind,
        "certificates": certs,
        "expires_at": "2027-06-01T00:00:00Z",
    })
}

fn store(document: Value) -> IdentityStore {
    let document: IdentityDocument = serde_json::from_value(document).unwrap();
    IdentityStore::load(document, now()).unwrap()
}

fn targets(ids: &[&str]) -> Vec<TargetBundle> {
    ids.iter()
        .map(|id| TargetBundle::new(*id, Vec::<String>::new()))
        .collect()
}

fn development() -> ExportMethod {
    ExportMethod::Distribute(DistributionMethod::Development)
}

fn app_store() -> ExportMethod {
    ExportMethod::Distribute(DistributionMethod::AppStore)
}

fn resolved(store: &IdentityStore, request: &ResolveRequest) -> Resolution {
    match resolve(store, request).unwrap() {
        Outcome::Resolved(resolution) => resolution,
        Outcome::NotResigned => panic!("expected a resolution"),
    }
}

fn single_development_setup(platform_managed: bool) -> IdentityStore {
    let mut dev_profile = profile("Acme Dev", "P-1", "com.acme.app", "development", &["AA01"]);
    dev_profile["platform_managed"] = json!(platform_managed);
    store(json!({
        "certificates": [certificate("Apple Development: Jo (X1)", "AA01", "2027-01-01T00:00:00Z")],
        "profiles": [dev_profile],
    }))
}

#[test]
fn single_certificate_and_profile_resolve() {
    let store = single_development_setup(false);
    let request = ResolveRequest::new(targets(&["com.acme.app"]), development());

    let resolution = resolved(&store, &request);
    assert_eq!(resolution.group.certificate.common_name, "Apple Development: Jo (X1)");
    assert_eq!(resolution.group.profiles["com.acme.app"].name, "Acme Dev");
    assert!(resolution.group.installer_certificate.is_none());
    assert!(resolution.ambiguity.is_none());
    assert_eq!(resolution.summary.groups, 1);
}

#[test]
fn managed_profile_is_excluded_for_manually_signed_archive() {
    let store = single_development_setup(true);
    let request = ResolveRequest::new(targets(&["com.acme.app"]), development());

    let err = resolve(&store, &request).unwrap_err();
    match &err {
        ResolveError::FilteredToEmpty { stage, trace } => {
            assert_eq!(*stage, Stage::NotPlatformManaged);
            let report = trace.report(Stage::NotPlatformManaged).unwrap();
            assert_eq!((report.groups_before, report.groups_after), (1, 0));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.trace().is_some());
}

#[test]
fn managed_profile_is_kept_for_managed_archive() {
    let store = single_development_setup(true);
    let request = ResolveRequest::new(targets(&["com.acme.app"]), development())
        .archived_with_managed_profile(true);

    let resolution = resolved(&store, &request);
    assert!(resolution.group.profiles["com.acme.app"].platform_managed);
    assert!(!resolution.trace.report(Stage::NotPlatformManaged).unwrap().applied);
}

#[test]
fn certificate_missing_a_bundle_is_dropped_by_the_builder() {
    let store = store(json!({
        "certificates": [
            certificate("Apple Development: Full", "AA01", "2027-01-01T00:00:00Z"),
            certificate("Apple Development: Partial", "BB02", "2028-01-01T00:00:00Z"),
        ],
        "profiles": [
            profile("App", "P-1", "com.acme.app", "development", &["AA01", "BB02"]),
            profile("Ext", "P-2", "com.acme.app.ext", "development", &["AA01"]),
        ],
    }));
    let request = ResolveRequest::new(
        targets(&["com.acme.app", "com.acme.app.ext"]),
        development(),
    );

    let resolution = resolved(&store, &request);
    assert_eq!(resolution.summary.certificates, 2);
    assert_eq!(resolution.summary.groups, 1);
    assert_eq!(resolution.group.certificate.common_name, "Apple Development: Full");
    assert!(resolution.ambiguity.is_none());
    for report in resolution.trace.iter() {
        assert_eq!(report.removed_groups(), 0, "{} removed a group", report.stage);
    }
}

#[test]
fn store_distribution_without_installer_fails() {
    let store = store(json!({
        "certificates": [certificate("Apple Distribution: Acme", "CC03", "2027-01-01T00:00:00Z")],
        "profiles": [profile("Acme Store", "P-1", "com.acme.app", "app-store", &["CC03"])],
    }));
    let request = ResolveRequest::new(targets(&["com.acme.app"]), app_store());

    match resolve(&store, &request).unwrap_err() {
        ResolveError::NoInstallerCertificate { groups, trace } => {
            assert_eq!(groups, 1);
            let pairing = trace.report(Stage::InstallerPairing).unwrap();
            assert!(pairing.applied);
            assert_eq!(pairing.groups_after, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn store_distribution_pairs_installer_and_writes_export_options() {
    let store = store(json!({
        "certificates": [certificate("Apple Distribution: Acme", "CC03", "2027-01-01T00:00:00Z")],
        "installer_certificates": [
            certificate("3rd Party Mac Developer Installer: Acme", "DD04", "2027-01-01T00:00:00Z"),
        ],
        "profiles": [profile("Acme Store", "P-1", "com.acme.app", "app-store", &["CC03"])],
    }));
    let request = ResolveRequest::new(targets(&["com.acme.app"]), app_store());

    let resolution = resolved(&store, &request);
    let xml = ExportOptions::from_resolved(&resolution.group).to_xml().unwrap();
    let plist: plist::Value = plist::from_bytes(&xml).unwrap();
    let dict = plist.as_dictionary().unwrap();
    assert_eq!(
        dict.get("installerSigningCertificate").and_then(|v| v.as_string()),
        Some("3rd Party Mac Developer Installer: Acme")
    );
    assert_eq!(dict.get("teamID").and_then(|v| v.as_string()), Some(TEAM));
}

#[test]
fn renewed_installer_certificate_is_not_an_ambiguity() {
    let store = store(json!({
        "certificates": [certificate("Apple Distribution: Acme", "CC03", "2027-01-01T00:00:00Z")],
        "installer_certificates": [
            certificate("Installer old", "DD04", "2026-03-01T00:00:00Z"),
            certificate("Installer new", "DD05", "2028-01-01T00:00:00Z"),
        ],
        "profiles": [profile("Acme Store", "P-1", "com.acme.app", "app-store", &["CC03"])],
    }));
    let request = ResolveRequest::new(targets(&["com.acme.app"]), app_store())
        .ambiguity(AmbiguityPolicy::Fail);

    let resolution = resolved(&store, &request);
    assert!(resolution.ambiguity.is_none());
    assert_eq!(
        resolution.group.installer_certificate.as_ref().map(|c| c.common_name.as_str()),
        Some("Installer new")
    );
    let pairing = resolution.trace.report(Stage::InstallerPairing).unwrap();
    assert_eq!((pairing.groups_before, pairing.groups_after), (1, 1));
}

fn ambiguous_document() -> Value {
    json!({
        "certificates": [
            certificate("Apple Development: Zed", "AA01", "2027-01-01T00:00:00Z"),
            certificate("Apple Development: Amy", "BB02", "2027-01-01T00:00:00Z"),
            certificate("Apple Development: Old", "EE05", "2026-06-01T00:00:00Z"),
        ],
        "profiles": [
            profile("Dev Wildcard", "P-3", "com.acme.*", "development", &["AA01", "BB02", "EE05"]),
            profile("Dev App", "P-1", "com.acme.app", "development", &["AA01", "BB02", "EE05"]),
            profile("Store App", "P-2", "com.acme.app", "app-store", &["AA01"]),
        ],
    })
}

#[test]
fn ambiguity_picks_canonical_first_and_reports_it() {
    let store = store(ambiguous_document());
    let request = ResolveRequest::new(targets(&["com.acme.app"]), development());

    let resolution = resolved(&store, &request);
    let ambiguity = resolution.ambiguity.unwrap();
    assert_eq!(ambiguity.candidates, 3);
    // latest expiry first, then name
    assert_eq!(ambiguity.chosen_certificate, "Apple Development: Amy");
    assert_eq!(resolution.group.profiles["com.acme.app"].name, "Dev App");
}

#[test]
fn strict_policy_refuses_ambiguity() {
    let store = store(ambiguous_document());
    let request = ResolveRequest::new(targets(&["com.acme.app"]), development())
        .ambiguity(AmbiguityPolicy::Fail);

    assert!(matches!(
        resolve(&store, &request),
        Err(ResolveError::AmbiguousResolution { candidates: 3, .. })
    ));
}

#[test]
fn result_does_not_depend_on_input_order() {
    let forward = ambiguous_document();
    let mut reversed = forward.clone();
    for key in ["certificates", "profiles"] {
        reversed[key].as_array_mut().unwrap().reverse();
    }
    let request = ResolveRequest::new(targets(&["com.acme.app", "com.acme.app.ext"]), development());

    let a = resolved(&store(forward), &request);
    let b = resolved(&store(reversed), &request);
    assert_eq!(a.group, b.group);
    assert_eq!(a.trace, b.trace);
    assert_eq!(a.ambiguity, b.ambiguity);
}

#[test]
fn every_bundle_gets_one_profile_of_the_requested_method() {
    let store = store(ambiguous_document());
    let request = ResolveRequest::new(
        targets(&["com.acme.app", "com.acme.app.ext", "com.acme.app.widget"]),
        development(),
    );

    let resolution = resolved(&store, &request);
    let bundles: Vec<&str> = resolution.group.profiles.keys().map(String::as_str).collect();
    assert_eq!(bundles, ["com.acme.app", "com.acme.app.ext", "com.acme.app.widget"]);
    for profile in resolution.group.profiles.values() {
        assert_eq!(profile.distribution, DistributionMethod::Development);
        assert!(profile.is_signed_by(&resolution.group.certificate));
    }
    assert_eq!(resolution.group.profiles["com.acme.app.ext"].name, "Dev Wildcard");
}

#[test]
fn wildcard_does_not_match_sibling_prefix() {
    let store = store(json!({
        "certificates": [certificate("Apple Development: Jo", "AA01", "2027-01-01T00:00:00Z")],
        "profiles": [profile("Dev Wildcard", "P-1", "com.acme.*", "development", &["AA01"])],
    }));
    let request = ResolveRequest::new(targets(&["com.acme2.app"]), development());

    assert!(matches!(
        resolve(&store, &request),
        Err(ResolveError::NoCandidate { .. })
    ));

    let request = ResolveRequest::new(targets(&["com.acme.app.ext"]), development());
    let resolution = resolved(&store, &request);
    assert!(resolution.group.profiles["com.acme.app.ext"].bundle_id.is_wildcard());
}

#[test]
fn entitlements_select_the_covering_profile() {
    let mut exact = profile("Exact No Sandbox", "P-1", "com.acme.app", "development", &["AA01"]);
    exact["entitlements"] = json!({ "get-task-allow": true });
    let mut wildcard = profile("Wildcard Sandbox", "P-2", "com.acme.*", "development", &["AA01"]);
    wildcard["entitlements"] = json!(["com.apple.security.app-sandbox", "get-task-allow"]);
    let store = store(json!({
        "certificates": [certificate("Apple Development: Jo", "AA01", "2027-01-01T00:00:00Z")],
        "profiles": [exact, wildcard],
    }));

    let document: TargetDocument = serde_json::from_value(json!({
        "targets": [{
            "bundle_id": "com.acme.app",
            "entitlements": { "com.apple.security.app-sandbox": true },
        }],
    }))
    .unwrap();
    let request = ResolveRequest::new(load_targets(document).unwrap(), development());

    let resolution = resolved(&store, &request);
    let chosen = &resolution.group.profiles["com.acme.app"];
    assert_eq!(chosen.name, "Wildcard Sandbox");
    assert!(chosen.entitlements.contains("com.apple.security.app-sandbox"));

    let report = resolution.trace.report(Stage::Entitlements).unwrap();
    assert!(report.applied);
    assert_eq!((report.candidates_before, report.candidates_after), (2, 1));
}

#[test]
fn forced_team_can_empty_the_set() {
    let store = single_development_setup(false);
    let request =
        ResolveRequest::new(targets(&["com.acme.app"]), development()).team_id("OTHERTEAM1");

    assert!(matches!(
        resolve(&store, &request),
        Err(ResolveError::FilteredToEmpty { stage: Stage::Team, .. })
    ));
}

#[test]
fn filtering_never_grows_the_set() {
    let store = store(ambiguous_document());
    let request = ResolveRequest::new(targets(&["com.acme.app"]), development()).team_id(TEAM);

    let resolution = resolved(&store, &request);
    let reports = resolution.trace.reports();
    assert_eq!(reports.len(), 5);
    for pair in reports.windows(2) {
        assert_eq!(pair[0].groups_after, pair[1].groups_before);
        assert_eq!(pair[0].candidates_after, pair[1].candidates_before);
    }
    for report in reports {
        assert!(report.groups_after <= report.groups_before);
        assert!(report.candidates_after <= report.candidates_before);
    }
}

#[test]
fn expired_profiles_and_certificates_are_not_candidates() {
    let mut expired = profile("Old Dev", "P-1", "com.acme.app", "development", &["AA01"]);
    expired["expires_at"] = json!("2025-12-01T00:00:00Z");
    let store = store(json!({
        "certificates": [
            certificate("Apple Development: Jo", "AA01", "2027-01-01T00:00:00Z"),
            certificate("Apple Development: Gone", "BB02", "2025-01-01T00:00:00Z"),
        ],
        "profiles": [
            expired,
            profile("Gone Dev", "P-2", "com.acme.app", "development", &["BB02"]),
        ],
    }));
    assert_eq!(store.expired_profiles().len(), 1);
    assert_eq!(store.invalid_certificates().len(), 1);

    let request = ResolveRequest::new(targets(&["com.acme.app"]), development());
    match resolve(&store, &request).unwrap_err() {
        ResolveError::NoCandidate {
            certificates,
            bundle_ids,
            ..
        } => {
            assert_eq!(certificates, 1);
            assert_eq!(bundle_ids, ["com.acme.app"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn no_resign_returns_without_resolving() {
    let store = store(json!({}));
    let request = ResolveRequest::new(Vec::new(), "none".parse().unwrap());
    assert!(matches!(resolve(&store, &request), Ok(Outcome::NotResigned)));
}
