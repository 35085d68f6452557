//! TOML-based configuration for peerpick.
//!
//! One file describes one project: where its working copy lives, which peers
//! it pulls from, where the decision ledgers are kept and how the preview
//! workflow treats the user's uncommitted work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::ledger::is_valid_key;
use crate::models::Peer;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerpickConfig {
    /// The local working copy.
    #[serde(default)]
    pub project: ProjectSection,

    /// Where decision ledgers are stored.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Peer fetch behaviour.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Local git command behaviour.
    #[serde(default)]
    pub git: GitConfig,

    /// Preview workflow behaviour.
    #[serde(default)]
    pub preview: PreviewConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Configured peers, in display order.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// The project's working copy and identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Path to the git working copy. Relative paths are resolved against the
    /// directory holding the config file.
    #[serde(default = "default_project_path")]
    pub path: PathBuf,

    /// Stable project identifier. Derived from the working copy path when
    /// absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable project name.
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_project_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            path: default_project_path(),
            id: None,
            display_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerConfig {
    /// Root directory for ledgers. Defaults to the platform data directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Fetch / git
// ---------------------------------------------------------------------------

/// Peer fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Seconds before a single peer fetch is abandoned (default 60).
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Maximum peers fetched at the same time (default 4).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_fetch_timeout() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    4
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Local git command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Seconds before a local git command is abandoned (default 120).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    120
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// What accepting a preview does with the work stashed when it started.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AcceptStashPolicy {
    /// Re-apply the stash on top of the accepted commits. If that conflicts
    /// the stash entry is kept and reported.
    #[default]
    Restore,
    /// Leave the stash entry in `git stash list` for the user.
    Keep,
    /// Drop the stash entry.
    Discard,
}

impl std::fmt::Display for AcceptStashPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restore => write!(f, "restore"),
            Self::Keep => write!(f, "keep"),
            Self::Discard => write!(f, "discard"),
        }
    }
}

/// Preview workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreviewConfig {
    #[serde(default)]
    pub accept_stash_policy: AcceptStashPolicy,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// One configured peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Stable peer identifier (`[A-Za-z0-9._-]+`).
    pub id: String,

    /// Display name; defaults to the id.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Git remote name; defaults to the id.
    #[serde(default)]
    pub remote: Option<String>,

    /// Branch offering changes (default `main`).
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".into()
}

impl PeerConfig {
    pub fn to_peer(&self) -> Peer {
        Peer {
            id: self.id.clone(),
            display_name: self.display_name.clone().unwrap_or_else(|| self.id.clone()),
            remote: self.remote.clone().unwrap_or_else(|| self.id.clone()),
            branch: self.branch.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl PeerpickConfig {
    /// Load a config from a TOML file. Relative paths inside it are resolved
    /// against the file's directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: PeerpickConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Expand `~` and anchor relative paths at `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let project = expand_tilde(&self.project.path);
        self.project.path = if project.is_relative() {
            base.join(project)
        } else {
            project
        };
        if let Some(dir) = self.ledger.dir.take() {
            let dir = expand_tilde(&dir);
            self.ledger.dir = Some(if dir.is_relative() { base.join(dir) } else { dir });
        }
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref id) = self.project.id {
            if !is_valid_key(id) {
                return Err(ConfigError::InvalidValue {
                    field: "project.id".into(),
                    detail: format!("'{id}' must match [A-Za-z0-9._-]+"),
                });
            }
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.fetch.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch.max_concurrent".into(),
                detail: "concurrency must be > 0".into(),
            });
        }
        if self.git.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git.command_timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for (idx, peer) in self.peers.iter().enumerate() {
            let field = format!("peers[{idx}]");
            if !is_valid_key(&peer.id) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{field}.id"),
                    detail: format!("'{}' must match [A-Za-z0-9._-]+", peer.id),
                });
            }
            if !seen.insert(peer.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{field}.id"),
                    detail: format!("duplicate peer id '{}'", peer.id),
                });
            }
            if matches!(peer.remote.as_deref(), Some(r) if r.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{field}.remote"),
                    detail: "remote must not be empty".into(),
                });
            }
            if peer.branch.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("{field}.branch"),
                    detail: "branch must not be empty".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// The configured project id, or one derived from the working copy path.
    pub fn project_id(&self) -> String {
        match self.project.id {
            Some(ref id) => id.clone(),
            None => derive_project_id(&self.project.path),
        }
    }

    pub fn project_display_name(&self) -> String {
        self.project.display_name.clone().unwrap_or_else(|| {
            self.project
                .path
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .unwrap_or_else(|| self.project_id())
        })
    }

    /// Root directory for ledgers.
    pub fn ledger_dir(&self) -> PathBuf {
        match self.ledger.dir {
            Some(ref dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|d| d.join("peerpick").join("ledgers"))
                .unwrap_or_else(|| self.project.path.join(".peerpick").join("ledgers")),
        }
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.iter().map(PeerConfig::to_peer).collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.git.command_timeout_secs)
    }
}

/// Stable project id: the first 16 hex chars of SHA-256 over the canonical
/// working copy path.
pub fn derive_project_id(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str() {
        Some("~") => dirs::home_dir().unwrap_or_else(|| path.to_path_buf()),
        Some(s) if s.starts_with("~/") => match dirs::home_dir() {
            Some(home) => home.join(&s[2..]),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[project]
path = "vault"
id = "interbrain-vault"
display_name = "InterBrain vault"

[ledger]
dir = "ledgers"

[fetch]
timeout_secs = 30
max_concurrent = 2

[git]
command_timeout_secs = 90

[preview]
accept_stash_policy = "keep"

[logging]
level = "debug"

[[peers]]
id = "bob"
display_name = "Bob"
remote = "bob-remote"
branch = "trunk"

[[peers]]
id = "charlie"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: PeerpickConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.project_id(), "interbrain-vault");
        assert_eq!(config.fetch.max_concurrent, 2);
        assert_eq!(config.preview.accept_stash_policy, AcceptStashPolicy::Keep);
        assert_eq!(config.logging.level, "debug");

        let peers = config.peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].remote, "bob-remote");
        assert_eq!(peers[0].tracking_ref(), "refs/remotes/bob-remote/trunk");
        assert_eq!(peers[1].display_name, "charlie");
        assert_eq!(peers[1].remote, "charlie");
        assert_eq!(peers[1].branch, "main");
    }

    #[test]
    fn test_load_from_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peerpick.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = PeerpickConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.project.path, dir.path().join("vault"));
        assert_eq!(config.ledger_dir(), dir.path().join("ledgers"));
    }

    #[test]
    fn test_file_not_found() {
        let result = PeerpickConfig::load_from_file("/nonexistent/peerpick.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: PeerpickConfig = toml::from_str("").unwrap();
        assert_eq!(config.fetch.timeout_secs, 60);
        assert_eq!(config.fetch.max_concurrent, 4);
        assert_eq!(config.git.command_timeout_secs, 120);
        assert_eq!(config.preview.accept_stash_policy, AcceptStashPolicy::Restore);
        assert_eq!(config.logging.level, "info");
        assert!(config.peers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_peer() {
        let mut config: PeerpickConfig = toml::from_str(sample_toml()).unwrap();
        config.peers[1].id = "bob".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "peers[1].id"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_peer_id() {
        let mut config: PeerpickConfig = toml::from_str(sample_toml()).unwrap();
        config.peers[0].id = "bob/../../etc".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config: PeerpickConfig = toml::from_str(sample_toml()).unwrap();
        config.fetch.max_concurrent = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "fetch.max_concurrent"
        ));
    }

    #[test]
    fn test_derived_project_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = derive_project_id(dir.path());
        let b = derive_project_id(dir.path());
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(is_valid_key(&a));
    }
}
