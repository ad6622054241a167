//! Publishing artifacts to a git-hosted data repository.
//!
//! A [`RemoteBackend`] is one hosting strategy (tree-commit or multipart
//! commit). Path construction and commit message formatting live here as free
//! functions so both strategies lay out the repository identically.

pub mod cleanup;
pub mod http;
pub mod mock;
pub mod multipart;
pub mod tree;

use crate::config::{BackendKind, RemoteConfig};
use crate::error::{Result, SheetSyncError};
use crate::progress::ProgressSink;
use crate::version::VersionRegistry;
use std::sync::Arc;

pub use cleanup::{clear_old_versions, CleanupReport};
pub use http::{HttpTransport, ReqwestTransport};
pub use multipart::MultipartCommitBackend;
pub use tree::TreeCommitBackend;

/// Role directory for generated source.
pub const CODE_ROLE: &str = "code";

/// Directories under the base path that hold unversioned role files rather
/// than versioned artifacts.
pub const ROLE_DIRS: &[&str] = &[CODE_ROLE];

pub const VERSION_FILE: &str = "version.txt";

pub const DATA_MESSAGE: &str = "update data";
pub const CODE_MESSAGE: &str = "update code";
pub const VERSION_MESSAGE: &str = "update version data";
pub const REMOVE_MESSAGE: &str = "clear old data";

/// Where artifacts live inside the remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    base_path: String,
}

impl RemoteLayout {
    pub fn new(base_path: impl Into<String>) -> Self {
        RemoteLayout {
            base_path: base_path.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{repository}_data`, under `Assets/StreamingAssets/` for the game
    /// engine layout.
    pub fn for_repository(repository: &str, engine_layout: bool) -> Self {
        if engine_layout {
            RemoteLayout::new(format!("Assets/StreamingAssets/{repository}_data"))
        } else {
            RemoteLayout::new(format!("{repository}_data"))
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn version_manifest_path(&self) -> String {
        format!("{}/{VERSION_FILE}", self.base_path)
    }

    /// `{base}/{ext}/{name}/{versioned_name}.{ext}`.
    pub fn artifact_path(&self, name: &str, versioned_name: &str, extension: &str) -> String {
        format!(
            "{}/{extension}/{name}/{versioned_name}.{extension}",
            self.base_path
        )
    }

    /// `{base}/{ext}/{name}/{name}_{version}.{ext}`.
    pub fn versioned_path(&self, name: &str, version: i64, extension: &str) -> String {
        self.artifact_path(name, &format!("{name}_{version}"), extension)
    }

    /// Unversioned path grouped by role, e.g. `{base}/code/items.rs`.
    pub fn role_path(&self, role: &str, file_name: &str) -> String {
        format!("{}/{role}/{file_name}", self.base_path)
    }
}

/// One file to write in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub path: String,
    pub content: Vec<u8>,
}

impl CommitEntry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        CommitEntry {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A group of entries sharing one message line. Several batches are
/// flattened into a single remote commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub message: String,
    pub entries: Vec<CommitEntry>,
}

impl CommitBatch {
    pub fn new(message: impl Into<String>) -> Self {
        CommitBatch {
            message: message.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: CommitEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Join the messages of non-empty batches with newlines and concatenate
    /// their entries in order.
    pub fn flatten(batches: Vec<CommitBatch>) -> (String, Vec<CommitEntry>) {
        let mut messages = Vec::new();
        let mut entries = Vec::new();
        for batch in batches.into_iter().filter(|b| !b.is_empty()) {
            messages.push(batch.message);
            entries.extend(batch.entries);
        }
        (messages.join("\n"), entries)
    }
}

/// `"{prefix} "` followed by `" {file}, "` for every file name.
pub fn upload_message<S: AsRef<str>>(prefix: &str, file_names: &[S]) -> String {
    let mut message = format!("{prefix} ");
    for name in file_names {
        message.push_str(&format!(" {}, ", name.as_ref()));
    }
    message
}

/// `"clear old data"` followed by one line per removed path.
pub fn removal_message<S: AsRef<str>>(paths: &[S]) -> String {
    let mut message = REMOVE_MESSAGE.to_string();
    for path in paths {
        message.push('\n');
        message.push_str(path.as_ref());
    }
    message
}

/// The last path segment.
pub(crate) fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Personal access token for the tree-commit host.
    Token(String),
    /// Username and app password for the multipart host.
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

/// One remote hosting strategy.
///
/// Every publish resolves the branch head afresh; nothing is cached between
/// calls. Both implementations produce the same repository contents for the
/// same calls.
#[async_trait::async_trait]
pub trait RemoteBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn branch(&self) -> &str;

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<UserIdentity>;

    /// Current head commit of the branch.
    async fn resolve_head(&self) -> Result<String>;

    /// Content of a file at the branch head, or [`SheetSyncError::NotFound`].
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Names of the directories directly under `path`. A missing directory
    /// has none.
    async fn list_directories(&self, path: &str) -> Result<Vec<String>>;

    /// Names of every branch of the repository, sorted.
    async fn list_branches(&self) -> Result<Vec<String>>;

    /// Write every entry in one commit and return the new head. The branch
    /// does not move unless the whole batch lands.
    async fn publish_batch(
        &self,
        entries: &[CommitEntry],
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String>;

    /// Delete every path in one commit and return the new head.
    async fn remove_batch(
        &self,
        paths: &[String],
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String>;

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.read_file(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Build the backend selected by the configuration.
pub fn connect(config: &RemoteConfig, transport: Arc<dyn HttpTransport>) -> Box<dyn RemoteBackend> {
    let api_url = config.api_url();
    match config.backend {
        BackendKind::Github => Box::new(TreeCommitBackend::new(
            transport,
            api_url,
            &config.owner,
            &config.repository,
            &config.branch,
        )),
        BackendKind::Bitbucket => Box::new(MultipartCommitBackend::new(
            transport,
            api_url,
            &config.owner,
            &config.repository,
            &config.branch,
        )),
    }
}

/// Load the remote version manifest.
///
/// A missing manifest yields a registry with a fresh entry per bootstrap key.
/// Any other read or parse failure is returned.
pub async fn fetch_registry<S: AsRef<str>>(
    backend: &dyn RemoteBackend,
    layout: &RemoteLayout,
    bootstrap_keys: &[S],
) -> Result<VersionRegistry> {
    match backend.read_file(&layout.version_manifest_path()).await {
        Ok(bytes) => {
            let payload = String::from_utf8(bytes).map_err(|e| {
                SheetSyncError::Other(format!("version manifest is not UTF-8: {e}"))
            })?;
            VersionRegistry::from_manifest(&payload)
        }
        Err(e) if e.is_not_found() => {
            log::info!("No version manifest on remote, starting fresh");
            Ok(VersionRegistry::bootstrap(
                bootstrap_keys.iter().map(|k| k.as_ref()),
            ))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use mock::MockGitHost;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_layout_paths() {
        let layout = RemoteLayout::for_repository("game", false);
        assert_eq!(layout.base_path(), "game_data");
        assert_eq!(layout.version_manifest_path(), "game_data/version.txt");
        assert_eq!(
            layout.versioned_path("Items", 3, "csv"),
            "game_data/csv/Items/Items_3.csv"
        );
        assert_eq!(layout.role_path(CODE_ROLE, "items.rs"), "game_data/code/items.rs");

        let engine = RemoteLayout::for_repository("game", true);
        assert_eq!(engine.base_path(), "Assets/StreamingAssets/game_data");
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            upload_message(DATA_MESSAGE, &["a_1.csv", "b_1.db"]),
            "update data  a_1.csv,  b_1.db, "
        );
        assert_eq!(
            removal_message(&["x/a_0.csv", "x/a_1.csv"]),
            "clear old data\nx/a_0.csv\nx/a_1.csv"
        );
    }

    #[test]
    fn test_flatten_skips_empty_batches() {
        let mut data = CommitBatch::new("update data  a_0.csv, ");
        data.push(CommitEntry::new("d/a_0.csv", "x"));
        let code = CommitBatch::new(CODE_MESSAGE);
        let mut version = CommitBatch::new(VERSION_MESSAGE);
        version.push(CommitEntry::new("d/version.txt", "a_0/"));

        let (message, entries) = CommitBatch::flatten(vec![data, code, version]);
        assert_eq!(message, "update data  a_0.csv, \nupdate version data");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].path, "d/version.txt");
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials::Basic {
            username: "me".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
        assert!(!format!("{:?}", Credentials::Token("t0k".into())).contains("t0k"));
    }

    #[tokio::test]
    async fn test_fetch_registry_bootstraps_when_manifest_missing() {
        let host = Arc::new(MockGitHost::new("main").with_token("t"));
        let mut backend = TreeCommitBackend::new(
            host.clone(),
            "https://api.github.com",
            "org",
            "game",
            "main",
        );
        backend
            .authenticate(&Credentials::Token("t".into()))
            .await
            .unwrap();
        let layout = RemoteLayout::for_repository("game", false);

        let registry = fetch_registry(&backend, &layout, &["Items", "Stats"]).await.unwrap();
        assert_eq!(registry.get("Items").unwrap().version, -1);
        assert_eq!(registry.len(), 2);

        backend
            .publish_batch(
                &[CommitEntry::new(layout.version_manifest_path(), "Items_4/")],
                VERSION_MESSAGE,
                &NoProgress,
            )
            .await
            .unwrap();
        let registry = fetch_registry(&backend, &layout, &["Stats"]).await.unwrap();
        assert_eq!(registry.get("Items").unwrap().version, 4);
        assert!(registry.get("Stats").is_none());
    }

    #[tokio::test]
    async fn test_fetch_registry_rejects_malformed_manifest() {
        let host = Arc::new(MockGitHost::new("main").with_token("t"));
        let layout = RemoteLayout::for_repository("game", false);
        host.seed_file("main", &layout.version_manifest_path(), b"Items_1/broken/");
        let mut backend =
            TreeCommitBackend::new(host, "https://api.github.com", "org", "game", "main");
        backend
            .authenticate(&Credentials::Token("t".into()))
            .await
            .unwrap();

        let err = fetch_registry(&backend, &layout, &["Items"]).await.unwrap_err();
        assert!(matches!(err, SheetSyncError::VersionParse { .. }));
    }
}
