//! Identity store built once per resolution run

use super::{
    CertificateIdentity, Fingerprint, IdentityDocument, ProvisioningProfile, RecordKind,
};
use crate::error::{ResolveError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a certificate cannot be used for signing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidity {
    Expired,
    MissingPrivateKey,
}

impl fmt::Display for Invalidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expired => "expired",
            Self::MissingPrivateKey => "no matching private key",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCertificate {
    pub certificate: CertificateIdentity,
    pub reason: Invalidity,
}

/// Installed certificates split for diagnostic listing.
///
/// `duplicated` entries either share a common name with a longer-lived
/// certificate listed in `valid` (and still take part in matching), or are
/// exact repeats of a record that was collapsed into its first occurrence.
#[derive(Debug, Clone, Default)]
pub struct CertificateListing<'s> {
    pub valid: Vec<&'s CertificateIdentity>,
    pub duplicated: Vec<&'s CertificateIdentity>,
    pub invalid: Vec<&'s InvalidCertificate>,
}

#[derive(Debug, Clone, Default)]
struct CertificatePool {
    valid: Vec<CertificateIdentity>,
    invalid: Vec<InvalidCertificate>,
    /// Exact copies of a record already in `valid` or `invalid`
    repeated: Vec<CertificateIdentity>,
}

impl CertificatePool {
    fn build(
        certificates: Vec<CertificateIdentity>,
        kind: RecordKind,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut seen: BTreeMap<Fingerprint, CertificateIdentity> = BTreeMap::new();
        let mut pool = Self::default();

        for (index, certificate) in certificates.into_iter().enumerate() {
            // the same identity reached through two keychains
            if let Some(first) = seen.get(&certificate.fingerprint) {
                if *first != certificate {
                    return Err(ResolveError::InvalidInput {
                        kind,
                        index,
                        reason: format!(
                            "conflicting records for certificate fingerprint {}",
                            certificate.fingerprint
                        ),
                    });
                }
                pool.repeated.push(certificate);
                continue;
            }
            seen.insert(certificate.fingerprint.clone(), certificate.clone());

            if certificate.is_valid_at(now) {
                pool.valid.push(certificate);
            } else {
                let reason = if certificate.expires_at <= now {
                    Invalidity::Expired
                } else {
                    Invalidity::MissingPrivateKey
                };
                pool.invalid.push(InvalidCertificate {
                    certificate,
                    reason,
                });
            }
        }

        pool.valid.sort_by(canonical_order);
        pool.invalid
            .sort_by(|a, b| canonical_order(&a.certificate, &b.certificate));
        pool.repeated.sort_by(canonical_order);
        Ok(pool)
    }

    fn listing(&self) -> CertificateListing<'_> {
        let mut names = BTreeSet::new();
        let mut listing = CertificateListing::default();
        // valid is sorted by expiration descending, so the first of a name lives longest
        for certificate in &self.valid {
            if names.insert(certificate.common_name.as_str()) {
                listing.valid.push(certificate);
            } else {
                listing.duplicated.push(certificate);
            }
        }
        listing.duplicated.extend(self.repeated.iter());
        listing.invalid = self.invalid.iter().collect();
        listing
    }
}

/// Expiration descending, then common name, serial and fingerprint.
fn canonical_order(a: &CertificateIdentity, b: &CertificateIdentity) -> std::cmp::Ordering {
    b.expires_at
        .cmp(&a.expires_at)
        .then_with(|| a.common_name.cmp(&b.common_name))
        .then_with(|| a.serial.cmp(&b.serial))
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
}

/// Parsed certificates and profiles of one resolution run.
///
/// Valid certificates are kept in a canonical order independent of the order
/// they were supplied in, so resolution does not depend on keychain listing order.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    now: DateTime<Utc>,
    signing: CertificatePool,
    installer: CertificatePool,
    profiles: Vec<ProvisioningProfile>,
    expired_profiles: Vec<ProvisioningProfile>,
}

impl IdentityStore {
    /// Validate a raw identity document against the clock value `now`.
    ///
    /// # Errors
    /// Returns [`ResolveError::InvalidInput`] for the first malformed record.
    pub fn load(document: IdentityDocument, now: DateTime<Utc>) -> Result<Self> {
        let certificates = document
            .certificates
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_identity(RecordKind::Certificate, index))
            .collect::<Result<Vec<_>>>()?;
        let installer_certificates = document
            .installer_certificates
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_identity(RecordKind::InstallerCertificate, index))
            .collect::<Result<Vec<_>>>()?;
        let profiles = document
            .profiles
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_profile(index))
            .collect::<Result<Vec<_>>>()?;

        Self::from_parts(certificates, installer_certificates, profiles, now)
    }

    /// Build from already validated entities.
    pub fn from_parts(
        certificates: Vec<CertificateIdentity>,
        installer_certificates: Vec<CertificateIdentity>,
        profiles: Vec<ProvisioningProfile>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let signing = CertificatePool::build(certificates, RecordKind::Certificate, now)?;
        let installer =
            CertificatePool::build(installer_certificates, RecordKind::InstallerCertificate, now)?;

        let mut uuids = BTreeSet::new();
        let mut active = Vec::new();
        let mut expired = Vec::new();
        for (index, profile) in profiles.into_iter().enumerate() {
            if !uuids.insert(profile.uuid.clone()) {
                return Err(ResolveError::InvalidInput {
                    kind: RecordKind::Profile,
                    index,
                    reason: format!("duplicate profile UUID {}", profile.uuid),
                });
            }
            if profile.is_expired_at(now) {
                expired.push(profile);
            } else {
                active.push(profile);
            }
        }
        active.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        expired.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        Ok(Self {
            now,
            signing,
            installer,
            profiles: active,
            expired_profiles: expired,
        })
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    #[must_use]
    pub fn valid_certificates(&self) -> &[CertificateIdentity] {
        &self.signing.valid
    }

    #[must_use]
    pub fn invalid_certificates(&self) -> &[InvalidCertificate] {
        &self.signing.invalid
    }

    #[must_use]
    pub fn valid_installer_certificates(&self) -> &[CertificateIdentity] {
        &self.installer.valid
    }

    #[must_use]
    pub fn invalid_installer_certificates(&self) -> &[InvalidCertificate] {
        &self.installer.invalid
    }

    #[must_use]
    pub fn certificate_listing(&self) -> CertificateListing<'_> {
        self.signing.listing()
    }

    #[must_use]
    pub fn installer_certificate_listing(&self) -> CertificateListing<'_> {
        self.installer.listing()
    }

    /// Unexpired profiles, ordered by UUID.
    #[must_use]
    pub fn profiles(&self) -> &[ProvisioningProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn expired_profiles(&self) -> &[ProvisioningProfile] {
        &self.expired_profiles
    }

    /// Unexpired profiles whose bundle pattern matches `bundle_id`; may be empty.
    pub fn profiles_for_bundle<'s>(
        &'s self,
        bundle_id: &str,
    ) -> impl Iterator<Item = &'s ProvisioningProfile> {
        self.profiles
            .iter()
            .filter(move |profile| profile.bundle_id.matches(bundle_id))
    }

    #[must_use]
    pub fn is_team_member(identity: &CertificateIdentity, team_id: &str) -> bool {
        identity.team_id == team_id
    }

    /// Valid installer certificates per team, in canonical order.
    #[must_use]
    pub fn installer_certificates_by_team(&self) -> BTreeMap<&str, Vec<&CertificateIdentity>> {
        let mut by_team: BTreeMap<&str, Vec<&CertificateIdentity>> = BTreeMap::new();
        for certificate in &self.installer.valid {
            by_team
                .entry(certificate.team_id.as_str())
                .or_default()
                .push(certificate);
        }
        by_team
    }
}
