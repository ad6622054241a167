//! Removal of superseded artifact versions.

use super::{removal_message, RemoteBackend, RemoteLayout, ROLE_DIRS};
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::version::VersionRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// New branch head, when anything was removed.
    pub head: Option<String>,
}

/// Collect the older versions of every registered artifact and remove them in
/// one commit.
///
/// For each artifact and each extension directory found under the base path,
/// versions are probed from `version - 1` downward. The walk stops at the
/// first version that does not exist, so anything below a gap stays on the
/// remote.
pub async fn clear_old_versions(
    backend: &dyn RemoteBackend,
    layout: &RemoteLayout,
    registry: &VersionRegistry,
    progress: &dyn ProgressSink,
) -> Result<CleanupReport> {
    log::info!("Find Data Directories..");
    progress.on_label("Find Data Directories..");
    let extensions: Vec<String> = backend
        .list_directories(layout.base_path())
        .await?
        .into_iter()
        .filter(|dir| !ROLE_DIRS.contains(&dir.as_str()))
        .collect();

    let mut queue = Vec::new();
    for entry in registry.entries() {
        for extension in &extensions {
            let mut version = entry.version - 1;
            while version >= 0 {
                let path = layout.versioned_path(&entry.key, version, extension);
                if !backend.exists(&path).await? {
                    break;
                }
                log::debug!("Queue {path} for removal");
                queue.push(path);
                version -= 1;
            }
        }
    }

    if queue.is_empty() {
        log::info!("No old versions to remove");
        return Ok(CleanupReport::default());
    }

    let head = backend
        .remove_batch(&queue, &removal_message(&queue), progress)
        .await?;
    Ok(CleanupReport {
        removed: queue,
        head: Some(head),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::remote::mock::MockGitHost;
    use crate::remote::{Credentials, TreeCommitBackend};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn setup(versions: &[i64]) -> (Arc<MockGitHost>, TreeCommitBackend, RemoteLayout) {
        let host = Arc::new(MockGitHost::new("main").with_token("t"));
        let layout = RemoteLayout::for_repository("game", false);
        for v in versions {
            host.seed_file("main", &layout.versioned_path("Items", *v, "csv"), b"x");
        }
        host.seed_file("main", &layout.role_path("code", "items.rs"), b"//");
        let mut backend =
            TreeCommitBackend::new(host.clone(), "https://api.github.com", "org", "game", "main");
        backend
            .authenticate(&Credentials::Token("t".into()))
            .await
            .unwrap();
        (host, backend, layout)
    }

    fn registry(version: i64) -> VersionRegistry {
        VersionRegistry::from_manifest(&format!("Items_{version}/")).unwrap()
    }

    #[tokio::test]
    async fn test_contiguous_history_removes_all_older_versions() {
        let (host, backend, layout) = setup(&[0, 1, 2, 3]).await;

        let report = clear_old_versions(&backend, &layout, &registry(3), &NoProgress)
            .await
            .unwrap();

        assert_eq!(
            report.removed,
            vec![
                "game_data/csv/Items/Items_2.csv",
                "game_data/csv/Items/Items_1.csv",
                "game_data/csv/Items/Items_0.csv",
            ]
        );
        let commit = host.commit(&report.head.unwrap()).unwrap();
        assert!(commit.message.starts_with("clear old data\n"));
        assert_eq!(
            host.files("main").keys().cloned().collect::<Vec<_>>(),
            vec!["game_data/code/items.rs", "game_data/csv/Items/Items_3.csv"]
        );
    }

    #[tokio::test]
    async fn test_gap_stops_the_walk() {
        let (host, backend, layout) = setup(&[0, 2, 3]).await;

        let report = clear_old_versions(&backend, &layout, &registry(3), &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.removed, vec!["game_data/csv/Items/Items_2.csv"]);
        assert!(host.file("main", "game_data/csv/Items/Items_0.csv").is_some());
    }

    #[tokio::test]
    async fn test_nothing_to_remove_makes_no_commit() {
        let (host, backend, layout) = setup(&[0]).await;
        let before = host.head("main");

        let report = clear_old_versions(&backend, &layout, &registry(0), &NoProgress)
            .await
            .unwrap();

        assert_eq!(report, CleanupReport::default());
        assert_eq!(host.head("main"), before);
    }
}
