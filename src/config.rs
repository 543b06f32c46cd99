//! Configuration for a signing-group resolution run.

use crate::engine::{ExportMethod, ResolveRequest};
use crate::error::{ResolveError, Result};
use crate::group::AmbiguityPolicy;
use crate::identity::TargetBundle;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the configured export method
pub const ENV_EXPORT_METHOD: &str = "KODEGEN_EXPORT_METHOD";

/// Environment variable overriding the configured team
pub const ENV_TEAM_ID: &str = "KODEGEN_TEAM_ID";

pub const DEFAULT_IDENTITIES_FILE: &str = "identities.json";
pub const DEFAULT_TARGETS_FILE: &str = "targets.json";

/// Contents of `signgroup.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// development, ad-hoc, enterprise, app-store or none
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    #[serde(default)]
    pub archived_with_managed_profile: bool,

    #[serde(default)]
    pub ambiguity: AmbiguityPolicy,

    /// Identity document (certificates, installer certificates, profiles)
    #[serde(default = "default_identities")]
    pub identities: PathBuf,

    #[serde(default = "default_targets")]
    pub targets: PathBuf,

    /// Where to write `exportOptions.plist`, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_options: Option<PathBuf>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            team_id: None,
            archived_with_managed_profile: false,
            ambiguity: AmbiguityPolicy::default(),
            identities: default_identities(),
            targets: default_targets(),
            export_options: None,
        }
    }
}

impl ResolveConfig {
    /// Parse a TOML configuration and expand `~` in every path.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.expand_paths()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, else the default location when it exists, else defaults.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path).await;
        }
        match default_config_path() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                Self::load(&path).await
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply method and team overrides; blank values are ignored.
    pub fn apply_overrides(&mut self, method: Option<&str>, team_id: Option<&str>) {
        if let Some(method) = method.map(str::trim).filter(|m| !m.is_empty()) {
            self.method = method.to_string();
        }
        if let Some(team_id) = team_id.map(str::trim).filter(|t| !t.is_empty()) {
            self.team_id = Some(team_id.to_string());
        }
    }

    /// # Errors
    /// [`ResolveError::UnknownMethod`] when `method` is not a known export method
    pub fn export_method(&self) -> Result<ExportMethod> {
        self.method.parse()
    }

    /// Where to write export options for this run, if anywhere.
    ///
    /// # Errors
    /// [`ResolveError::InvalidConfig`] when a path is set but the method is `none`,
    /// since nothing is re-signed and no options would be written
    pub fn export_options_path(&self) -> Result<Option<&Path>> {
        match (self.export_options.as_deref(), self.export_method()?) {
            (Some(path), ExportMethod::NoResign) => Err(ResolveError::InvalidConfig(format!(
                "export options path {} requires a distribution method, but the method is 'none'",
                path.display()
            ))),
            (path, _) => Ok(path),
        }
    }

    pub fn request(&self, targets: Vec<TargetBundle>) -> Result<ResolveRequest> {
        let mut request = ResolveRequest::new(targets, self.export_method()?)
            .archived_with_managed_profile(self.archived_with_managed_profile)
            .ambiguity(self.ambiguity);
        if let Some(team_id) = self.team_id.as_deref().filter(|t| !t.trim().is_empty()) {
            request = request.team_id(team_id);
        }
        Ok(request)
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.identities = expand_path(&self.identities)?;
        self.targets = expand_path(&self.targets)?;
        if let Some(path) = &self.export_options {
            self.export_options = Some(expand_path(path)?);
        }
        Ok(())
    }
}

/// `~/.config/kodegen/signgroup.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("kodegen").join("signgroup.toml"))
}

/// Expand `~` to the home directory.
///
/// Fails when the path starts with `~` and HOME is not set, since shellexpand
/// leaves the tilde in place in that case.
pub fn expand_tilde_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path).to_string();

    if path.starts_with('~') && expanded.starts_with('~') {
        return Err(ResolveError::InvalidConfig(format!(
            "Could not expand ~ in path '{path}' (HOME environment variable not set). \
             Please use an absolute path instead."
        )));
    }

    Ok(expanded)
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    expand_tilde_path(text).map(PathBuf::from)
}

fn default_method() -> String {
    "development".to_string()
}

fn default_identities() -> PathBuf {
    PathBuf::from(DEFAULT_IDENTITIES_FILE)
}

fn default_targets() -> PathBuf {
    PathBuf::from(DEFAULT_TARGETS_FILE)
}
