//! Export options property list for the external export step

use crate::error::Result;
use crate::group::ResolvedGroup;
use crate::identity::DistributionMethod;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningStyle {
    Manual,
}

/// Keys of an `exportOptions.plist`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub method: DistributionMethod,
    #[serde(rename = "teamID", skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub signing_style: SigningStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_signing_certificate: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub provisioning_profiles: BTreeMap<String, String>,
}

impl ExportOptions {
    /// Manual signing with the resolved certificate and profiles.
    #[must_use]
    pub fn from_resolved(group: &ResolvedGroup) -> Self {
        Self {
            method: group.method,
            team_id: Some(group.team_id().to_string()),
            signing_style: SigningStyle::Manual,
            signing_certificate: Some(group.certificate.common_name.clone()),
            installer_signing_certificate: group
                .installer_certificate
                .as_ref()
                .map(|c| c.common_name.clone()),
            provisioning_profiles: group
                .bundle_profile_names()
                .into_iter()
                .map(|(bundle_id, name)| (bundle_id.to_string(), name.to_string()))
                .collect(),
        }
    }

    /// XML property list bytes.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, self)?;
        Ok(buf)
    }
}
