//! Signing identities, provisioning profiles and export targets
//!
//! This module is decomposed into:
//! - `raw` - serde input documents and their validation into domain entities
//! - `store` - the per-run identity store answering validity and matching queries
//!
//! Every entity here is an immutable snapshot built once per resolution run.

mod raw;
mod store;

pub(crate) use raw::check_targets;
pub use raw::{
    load_targets, EntitlementSpec, IdentityDocument, RawCertificate, RawProfile, RawTarget,
    TargetDocument,
};
pub use store::{CertificateListing, IdentityStore, InvalidCertificate, Invalidity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Distribution channel of a profile, and the channel an export asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMethod {
    Development,
    AdHoc,
    Enterprise,
    AppStore,
}

impl DistributionMethod {
    /// Whether a profile of type `profile` may sign an export for this method.
    #[must_use]
    pub fn accepts(self, profile: DistributionMethod) -> bool {
        match self {
            Self::Development => matches!(profile, Self::Development),
            Self::AdHoc => matches!(profile, Self::AdHoc),
            Self::Enterprise => matches!(profile, Self::Enterprise),
            Self::AppStore => matches!(profile, Self::AppStore),
        }
    }

    /// String expected by the `method` key of export options.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::AdHoc => "ad-hoc",
            Self::Enterprise => "enterprise",
            Self::AppStore => "app-store",
        }
    }

    /// Only store distribution needs a separate installer signing certificate.
    #[must_use]
    pub fn requires_installer_certificate(self) -> bool {
        matches!(self, Self::AppStore)
    }
}

impl fmt::Display for DistributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of input record, used to point at the offending record in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Certificate,
    InstallerCertificate,
    Profile,
    Target,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Certificate => "certificate",
            Self::InstallerCertificate => "installer certificate",
            Self::Profile => "provisioning profile",
            Self::Target => "target",
        })
    }
}

/// SHA-1 certificate fingerprint, upper-case hex without separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Normalise a hex fingerprint, accepting `:` and whitespace separators.
    pub fn from_hex(value: &str) -> std::result::Result<Self, String> {
        let compact: String = value
            .chars()
            .filter(|c| *c != ':' && !c.is_whitespace())
            .collect();
        if compact.is_empty() {
            return Err("fingerprint is empty".to_string());
        }
        let bytes = hex::decode(&compact).map_err(|e| format!("fingerprint '{value}' is not hex: {e}"))?;
        Ok(Self(hex::encode_upper(bytes)))
    }

    /// Fingerprint of a DER-encoded certificate.
    #[must_use]
    pub fn of_der(der: &[u8]) -> Self {
        use sha1::{Digest, Sha1};
        Self(hex::encode_upper(Sha1::digest(der)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Code signing (or installer signing) certificate found in a keychain listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateIdentity {
    pub common_name: String,
    pub serial: String,
    pub team_id: String,
    pub team_name: String,
    pub expires_at: DateTime<Utc>,
    pub has_private_key: bool,
    pub fingerprint: Fingerprint,
}

impl CertificateIdentity {
    /// A certificate can sign only while unexpired and backed by its private key.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && self.has_private_key
    }
}

impl fmt::Display for CertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] team: {} ({}) expires: {}",
            self.common_name,
            self.serial,
            self.team_name,
            self.team_id,
            self.expires_at.format("%Y-%m-%d")
        )
    }
}

/// Bundle identifier pattern of a provisioning profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum BundlePattern {
    Exact(String),
    /// Trailing `*`; holds everything before it, including the final dot.
    Wildcard(String),
}

impl BundlePattern {
    pub fn parse(pattern: &str) -> std::result::Result<Self, String> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err("bundle identifier pattern is empty".to_string());
        }
        match pattern.find('*') {
            None => Ok(Self::Exact(pattern.to_string())),
            Some(pos) if pos == pattern.len() - 1 => Ok(Self::Wildcard(pattern[..pos].to_string())),
            Some(_) => Err(format!(
                "bundle identifier pattern '{pattern}' may only contain a trailing '*'"
            )),
        }
    }

    #[must_use]
    pub fn matches(&self, bundle_id: &str) -> bool {
        match self {
            Self::Exact(id) => id == bundle_id,
            Self::Wildcard(prefix) => bundle_id.starts_with(prefix.as_str()),
        }
    }

    /// Ordering key for tie-breaks: exact before wildcard, then longer before shorter.
    #[must_use]
    pub fn specificity(&self) -> (bool, usize) {
        match self {
            Self::Exact(id) => (true, id.len()),
            Self::Wildcard(prefix) => (false, prefix.len()),
        }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard(_))
    }
}

impl fmt::Display for BundlePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(id) => f.write_str(id),
            Self::Wildcard(prefix) => write!(f, "{prefix}*"),
        }
    }
}

impl From<BundlePattern> for String {
    fn from(pattern: BundlePattern) -> Self {
        pattern.to_string()
    }
}

/// Installed provisioning profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningProfile {
    pub name: String,
    pub uuid: String,
    pub team_id: String,
    pub team_name: String,
    pub bundle_id: BundlePattern,
    pub distribution: DistributionMethod,
    pub certificates: BTreeSet<Fingerprint>,
    pub devices: BTreeSet<String>,
    pub entitlements: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub platform_managed: bool,
}

impl ProvisioningProfile {
    #[must_use]
    pub fn is_signed_by(&self, certificate: &CertificateIdentity) -> bool {
        self.certificates.contains(&certificate.fingerprint)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Display for ProvisioningProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} [{}] team: {}{}",
            self.name,
            self.uuid,
            self.bundle_id,
            self.distribution,
            self.team_id,
            if self.platform_managed { " managed" } else { "" }
        )
    }
}

/// One bundle of the exported app (main app or extension) and the capabilities it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBundle {
    pub bundle_id: String,
    pub required_entitlements: BTreeSet<String>,
}

impl TargetBundle {
    pub fn new<I, S>(bundle_id: impl Into<String>, entitlements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bundle_id: bundle_id.into(),
            required_entitlements: entitlements.into_iter().map(Into::into).collect(),
        }
    }
}
