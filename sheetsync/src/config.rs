//! Project configuration loaded from `sheetsync.yaml`.

use crate::error::{Result, SheetSyncError};
use crate::remote::RemoteLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "sheetsync.yaml";

pub const TOKEN_ENV: &str = "SHEETSYNC_TOKEN";
pub const USERNAME_ENV: &str = "SHEETSYNC_USERNAME";
pub const APP_PASSWORD_ENV: &str = "SHEETSYNC_APP_PASSWORD";

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const BITBUCKET_API_URL: &str = "https://api.bitbucket.org/2.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Glob patterns of source sheets, relative to the config file.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Treat every sheet of a workbook as its own table.
    #[serde(default)]
    pub multi_sheet: bool,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,
    #[serde(default = "default_code_dir")]
    pub code_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            db_dir: default_db_dir(),
            code_dir: default_code_dir(),
        }
    }
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("db")
}

fn default_code_dir() -> PathBuf {
    PathBuf::from("code")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Github,
    Bitbucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub backend: BackendKind,
    /// Repository owner, or workspace on the multipart host.
    pub owner: String,
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub unity_layout: bool,
    #[serde(default)]
    pub shared_enums: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RemoteConfig {
    pub fn api_url(&self) -> String {
        match &self.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match self.backend {
                BackendKind::Github => GITHUB_API_URL.to_string(),
                BackendKind::Bitbucket => BITBUCKET_API_URL.to_string(),
            },
        }
    }

    pub fn layout(&self) -> RemoteLayout {
        RemoteLayout::for_repository(&self.repository, self.unity_layout)
    }
}

impl Config {
    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(remote) = &self.remote {
            if remote.owner.trim().is_empty() || remote.repository.trim().is_empty() {
                return Err(SheetSyncError::Config(
                    "remote.owner and remote.repository must not be empty".to_string(),
                ));
            }
            if remote.branch.trim().is_empty() {
                return Err(SheetSyncError::Config(
                    "remote.branch must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn remote(&self) -> Result<&RemoteConfig> {
        self.remote
            .as_ref()
            .ok_or_else(|| SheetSyncError::Config("no remote configured".to_string()))
    }

    /// Work on `branch` instead of the configured one.
    pub fn override_branch(&mut self, branch: &str) -> Result<()> {
        if branch.trim().is_empty() {
            return Err(SheetSyncError::Config("branch must not be empty".to_string()));
        }
        match self.remote.as_mut() {
            Some(remote) => {
                remote.branch = branch.to_string();
                Ok(())
            }
            None => Err(SheetSyncError::Config("no remote configured".to_string())),
        }
    }

    /// Expand the source globs relative to `root`, sorted and deduplicated.
    pub fn resolve_sources(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.sources {
            let full = if Path::new(pattern).is_absolute() {
                pattern.clone()
            } else {
                root.join(pattern).to_string_lossy().into_owned()
            };
            let paths = glob::glob(&full).map_err(|e| {
                SheetSyncError::Config(format!("invalid source pattern '{pattern}': {e}"))
            })?;
            for entry in paths {
                let path = entry.map_err(|e| SheetSyncError::Io(e.into()))?;
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.output.db_dir, PathBuf::from("db"));
        assert!(config.remote().is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
sources: ["sheets/*.csv"]
multi_sheet: true
output:
  db_dir: out/db
remote:
  backend: bitbucket
  owner: studio
  repository: game
  unity_layout: true
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.multi_sheet);
        assert_eq!(config.output.db_dir, PathBuf::from("out/db"));
        assert_eq!(config.output.code_dir, PathBuf::from("code"));

        let remote = config.remote().unwrap();
        assert_eq!(remote.backend, BackendKind::Bitbucket);
        assert_eq!(remote.branch, "main");
        assert_eq!(remote.api_url(), BITBUCKET_API_URL);
        assert_eq!(
            remote.layout().base_path(),
            "Assets/StreamingAssets/game_data"
        );
    }

    #[test]
    fn test_api_url_override_drops_trailing_slash() {
        let yaml = "remote:\n  backend: github\n  owner: o\n  repository: r\n  api_url: http://localhost:9000/\n";
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.remote().unwrap().api_url(), "http://localhost:9000");
    }

    #[test]
    fn test_empty_repository_is_rejected() {
        let yaml = "remote:\n  backend: github\n  owner: o\n  repository: ''\n";
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SheetSyncError::Config(_)));
    }

    #[test]
    fn test_override_branch() {
        let yaml = "remote:\n  backend: github\n  owner: o\n  repository: r\n";
        let mut config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.remote().unwrap().branch, "main");

        config.override_branch("staging").unwrap();
        assert_eq!(config.remote().unwrap().branch, "staging");
        assert!(config.override_branch(" ").is_err());
        assert!(Config::default().override_branch("dev").is_err());
    }

    #[test]
    fn test_resolve_sources_expands_globs() {
        let tmp = TempDir::new().unwrap();
        let sheets = tmp.path().join("sheets");
        std::fs::create_dir_all(&sheets).unwrap();
        std::fs::write(sheets.join("b.csv"), "Id:int\n1\n").unwrap();
        std::fs::write(sheets.join("a.csv"), "Id:int\n1\n").unwrap();
        std::fs::write(sheets.join("notes.txt"), "x").unwrap();

        let config = Config {
            sources: vec!["sheets/*.csv".into(), "sheets/a.csv".into()],
            ..Config::default()
        };
        let files = config.resolve_sources(tmp.path()).unwrap();
        assert_eq!(files, vec![sheets.join("a.csv"), sheets.join("b.csv")]);
    }
}
