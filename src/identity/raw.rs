//! Input documents as handed over by the keychain and profile parsers

use super::{
    BundlePattern, CertificateIdentity, DistributionMethod, Fingerprint, ProvisioningProfile,
    RecordKind, TargetBundle,
};
use crate::error::{ResolveError, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Entitlement key that marks a debuggable (development) build.
const GET_TASK_ALLOW: &str = "get-task-allow";

/// Installed certificates and profiles, already parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityDocument {
    #[serde(default)]
    pub certificates: Vec<RawCertificate>,
    #[serde(default)]
    pub installer_certificates: Vec<RawCertificate>,
    #[serde(default)]
    pub profiles: Vec<RawProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCertificate {
    pub common_name: Option<String>,
    pub serial: Option<String>,
    pub team_id: Option<String>,
    #[serde(default)]
    pub team_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_private_key: Option<bool>,
    /// SHA-1 fingerprint in hex, separators allowed
    pub fingerprint: Option<String>,
    /// Base64 DER of the certificate, used when no fingerprint is given
    pub der_base64: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProfile {
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub team_id: Option<String>,
    #[serde(default)]
    pub team_name: String,
    pub bundle_id: Option<String>,
    pub distribution_type: Option<DistributionMethod>,
    #[serde(default)]
    pub provisions_all_devices: bool,
    /// Hex fingerprints of the embedded developer certificates
    #[serde(default)]
    pub certificates: Vec<String>,
    /// Base64 DER of the embedded developer certificates
    #[serde(default)]
    pub developer_certificates: Vec<String>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub entitlements: EntitlementSpec,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub platform_managed: bool,
}

/// Entitlements either as bare keys or as the profile's key/value dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntitlementSpec {
    Keys(Vec<String>),
    Map(BTreeMap<String, serde_json::Value>),
}

impl Default for EntitlementSpec {
    fn default() -> Self {
        Self::Keys(Vec::new())
    }
}

impl EntitlementSpec {
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        match self {
            Self::Keys(keys) => keys.iter().cloned().collect(),
            Self::Map(map) => map.keys().cloned().collect(),
        }
    }

    /// Present and not explicitly `false`.
    #[must_use]
    pub fn grants(&self, key: &str) -> bool {
        match self {
            Self::Keys(keys) => keys.iter().any(|k| k == key),
            Self::Map(map) => map
                .get(key)
                .is_some_and(|value| value != &serde_json::Value::Bool(false)),
        }
    }
}

/// Targets of one export: the app bundle plus its extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetDocument {
    #[serde(default)]
    pub targets: Vec<RawTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTarget {
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub entitlements: EntitlementSpec,
}

fn invalid(kind: RecordKind, index: usize, reason: impl Into<String>) -> ResolveError {
    ResolveError::InvalidInput {
        kind,
        index,
        reason: reason.into(),
    }
}

fn required(
    value: Option<&String>,
    field: &str,
    kind: RecordKind,
    index: usize,
) -> Result<String> {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(invalid(kind, index, format!("missing required field '{field}'"))),
    }
}

fn decode_der(value: &str, kind: RecordKind, index: usize) -> Result<Fingerprint> {
    let der = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| invalid(kind, index, format!("certificate DER is not valid base64: {e}")))?;
    if der.is_empty() {
        return Err(invalid(kind, index, "certificate DER is empty"));
    }
    Ok(Fingerprint::of_der(&der))
}

impl RawCertificate {
    /// Validate into a [`CertificateIdentity`]; `kind` distinguishes signing and installer lists.
    pub fn into_identity(self, kind: RecordKind, index: usize) -> Result<CertificateIdentity> {
        let common_name = required(self.common_name.as_ref(), "common_name", kind, index)?;
        let serial = required(self.serial.as_ref(), "serial", kind, index)?;
        let team_id = required(self.team_id.as_ref(), "team_id", kind, index)?;
        let expires_at = self
            .expires_at
            .ok_or_else(|| invalid(kind, index, "missing required field 'expires_at'"))?;
        let has_private_key = self
            .has_private_key
            .ok_or_else(|| invalid(kind, index, "missing required field 'has_private_key'"))?;

        let fingerprint = match (self.fingerprint.as_deref(), self.der_base64.as_deref()) {
            (Some(hex), _) => Fingerprint::from_hex(hex).map_err(|e| invalid(kind, index, e))?,
            (None, Some(der)) => decode_der(der, kind, index)?,
            (None, None) => {
                return Err(invalid(
                    kind,
                    index,
                    "missing required field 'fingerprint' (or 'der_base64')",
                ));
            }
        };

        Ok(CertificateIdentity {
            common_name,
            serial,
            team_id,
            team_name: self.team_name.trim().to_string(),
            expires_at,
            has_private_key,
            fingerprint,
        })
    }
}

impl RawProfile {
    pub fn into_profile(self, index: usize) -> Result<ProvisioningProfile> {
        let kind = RecordKind::Profile;
        let name = required(self.name.as_ref(), "name", kind, index)?;
        let uuid = required(self.uuid.as_ref(), "uuid", kind, index)?;
        let team_id = required(self.team_id.as_ref(), "team_id", kind, index)?;
        let raw_bundle_id = required(self.bundle_id.as_ref(), "bundle_id", kind, index)?;
        let expires_at = self
            .expires_at
            .ok_or_else(|| invalid(kind, index, "missing required field 'expires_at'"))?;

        // application-identifier form: "<TEAMID>.com.example.app"
        let team_prefix = format!("{team_id}.");
        let bundle_id = raw_bundle_id
            .strip_prefix(team_prefix.as_str())
            .unwrap_or(&raw_bundle_id);
        let bundle_id = BundlePattern::parse(bundle_id).map_err(|e| invalid(kind, index, e))?;

        let mut certificates = BTreeSet::new();
        for hex in &self.certificates {
            certificates.insert(Fingerprint::from_hex(hex).map_err(|e| invalid(kind, index, e))?);
        }
        for der in &self.developer_certificates {
            certificates.insert(decode_der(der, kind, index)?);
        }
        if certificates.is_empty() {
            return Err(invalid(
                kind,
                index,
                "missing required field 'certificates' (or 'developer_certificates')",
            ));
        }

        let devices: BTreeSet<String> = self
            .devices
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();

        let distribution = self.distribution_type.unwrap_or_else(|| {
            if self.provisions_all_devices {
                DistributionMethod::Enterprise
            } else if devices.is_empty() {
                DistributionMethod::AppStore
            } else if self.entitlements.grants(GET_TASK_ALLOW) {
                DistributionMethod::Development
            } else {
                DistributionMethod::AdHoc
            }
        });

        Ok(ProvisioningProfile {
            name,
            uuid,
            team_id,
            team_name: self.team_name.trim().to_string(),
            bundle_id,
            distribution,
            certificates,
            devices,
            entitlements: self.entitlements.keys(),
            expires_at,
            platform_managed: self.platform_managed,
        })
    }
}

/// Validate the target list of one export.
///
/// Rejects an empty list, blank or wildcard bundle identifiers and duplicates.
pub fn load_targets(document: TargetDocument) -> Result<Vec<TargetBundle>> {
    let mut targets = Vec::with_capacity(document.targets.len());
    for (index, raw) in document.targets.into_iter().enumerate() {
        let bundle_id = required(raw.bundle_id.as_ref(), "bundle_id", RecordKind::Target, index)?;
        targets.push(TargetBundle {
            bundle_id,
            required_entitlements: raw.entitlements.keys(),
        });
    }
    check_targets(&targets)?;
    Ok(targets)
}

pub(crate) fn check_targets(targets: &[TargetBundle]) -> Result<()> {
    if targets.is_empty() {
        return Err(invalid(
            RecordKind::Target,
            0,
            "at least one target bundle is required",
        ));
    }

    let mut seen = BTreeSet::new();
    for (index, target) in targets.iter().enumerate() {
        let bundle_id = target.bundle_id.as_str();
        if bundle_id.trim().is_empty() {
            return Err(invalid(RecordKind::Target, index, "missing required field 'bundle_id'"));
        }
        if bundle_id.contains('*') {
            return Err(invalid(
                RecordKind::Target,
                index,
                format!("target bundle ID '{bundle_id}' must not contain a wildcard"),
            ));
        }
        if !seen.insert(bundle_id) {
            return Err(invalid(
                RecordKind::Target,
                index,
                format!("duplicate target bundle ID '{bundle_id}'"),
            ));
        }
    }
    Ok(())
}
