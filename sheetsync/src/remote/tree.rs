//! Tree-commit strategy over the git-data REST API.
//!
//! Publishing walks ref → commit → blobs → tree → commit → ref update. The ref
//! update is the only step that changes what the branch shows, so a failure
//! anywhere before it leaves the branch untouched.

use super::http::{check, HttpRequest, HttpResponse, HttpTransport};
use super::{CommitEntry, Credentials, RemoteBackend, UserIdentity};
use crate::error::{Result, SheetSyncError};
use crate::progress::{ProgressSink, StepCounter};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Steps around the per-blob uploads: ref, commit, tree, new commit, ref update.
const FIXED_STEPS: usize = 5;

pub struct TreeCommitBackend {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    owner: String,
    repository: String,
    branch: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: GitObject,
}

#[derive(Deserialize)]
struct CommitResponse {
    tree: GitObject,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct BranchEntry {
    name: String,
}

/// Page size requested when listing branches.
const BRANCH_PAGE: usize = 100;

/// A path to write (`Some`) or delete (`None`).
type TreeChange<'a> = (&'a str, Option<&'a [u8]>);

impl TreeCommitBackend {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: impl Into<String>,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Self {
        TreeCommitBackend {
            transport,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            token: None,
        }
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{tail}",
            self.api_url, self.owner, self.repository
        )
    }

    fn authorize(&self, request: HttpRequest) -> Result<HttpRequest> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| SheetSyncError::Auth("not authenticated".to_string()))?;
        Ok(request
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "sheetsync"))
    }

    async fn send(&self, request: HttpRequest, what: &str) -> Result<HttpResponse> {
        let request = self.authorize(request)?;
        let response = self.transport.send(request).await?;
        check(response, what)
    }

    async fn contents(&self, path: &str) -> Result<HttpResponse> {
        let url = self.repo_url(&format!(
            "contents/{}?ref={}",
            path.trim_matches('/'),
            self.branch
        ));
        self.send(HttpRequest::get(url), path).await
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        let body = json!({ "content": STANDARD.encode(content), "encoding": "base64" });
        let response = self
            .send(HttpRequest::post(self.repo_url("git/blobs")).json(body), "git/blobs")
            .await?;
        Ok(response.json::<GitObject>()?.sha)
    }

    /// Commit a set of changes on top of the branch head and move the branch.
    async fn commit_changes(
        &self,
        changes: &[TreeChange<'_>],
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        let blobs = changes.iter().filter(|(_, c)| c.is_some()).count();
        let mut steps = StepCounter::new(progress, FIXED_STEPS + blobs);

        let result = self.run_commit(changes, message, &mut steps).await;
        result.map_err(|e| e.at_step(steps.done(), steps.total()))
    }

    async fn run_commit(
        &self,
        changes: &[TreeChange<'_>],
        message: &str,
        steps: &mut StepCounter<'_>,
    ) -> Result<String> {
        steps.label("Get Branch Reference..");
        let head = self.resolve_head().await?;
        steps.advance();

        steps.label("Get Latest Commit..");
        let commit: CommitResponse = self
            .send(
                HttpRequest::get(self.repo_url(&format!("git/commits/{head}"))),
                "git/commits",
            )
            .await?
            .json()?;
        steps.advance();

        let mut tree = Vec::with_capacity(changes.len());
        for (path, content) in changes {
            let sha = match content {
                Some(bytes) => {
                    steps.label(&format!("Create Blob {path}.."));
                    let sha = self.create_blob(bytes).await?;
                    steps.advance();
                    serde_json::Value::String(sha)
                }
                None => serde_json::Value::Null,
            };
            tree.push(json!({ "path": path, "mode": "100644", "type": "blob", "sha": sha }));
        }

        steps.label("Create New Tree..");
        let new_tree: GitObject = self
            .send(
                HttpRequest::post(self.repo_url("git/trees"))
                    .json(json!({ "base_tree": commit.tree.sha, "tree": tree })),
                "git/trees",
            )
            .await?
            .json()?;
        steps.advance();

        steps.label("Create New Commit..");
        let new_commit: GitObject = self
            .send(
                HttpRequest::post(self.repo_url("git/commits")).json(json!({
                    "message": message,
                    "tree": new_tree.sha,
                    "parents": [head],
                })),
                "git/commits",
            )
            .await?
            .json()?;
        steps.advance();

        steps.label("Update Reference..");
        self.send(
            HttpRequest::patch(self.repo_url(&format!("git/refs/heads/{}", self.branch)))
                .json(json!({ "sha": new_commit.sha, "force": true })),
            "git/refs",
        )
        .await?;
        steps.advance();

        log::info!("{} now at {}", self.branch, new_commit.sha);
        Ok(new_commit.sha)
    }
}

#[async_trait::async_trait]
impl RemoteBackend for TreeCommitBackend {
    fn name(&self) -> &'static str {
        "github"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<UserIdentity> {
        let Credentials::Token(token) = credentials else {
            return Err(SheetSyncError::Auth(
                "tree-commit host needs a token".to_string(),
            ));
        };
        self.token = Some(token.clone());

        let user: UserResponse = match self
            .send(HttpRequest::get(format!("{}/user", self.api_url)), "user")
            .await
        {
            Ok(response) => response.json()?,
            Err(e) => {
                self.token = None;
                return Err(match e {
                    SheetSyncError::NotFound { .. } | SheetSyncError::Remote { .. } => {
                        SheetSyncError::Auth(e.to_string())
                    }
                    other => other,
                });
            }
        };
        log::info!("Authenticated as {}", user.login);
        Ok(UserIdentity {
            login: user.login,
            name: user.name,
            email: user.email,
        })
    }

    async fn resolve_head(&self) -> Result<String> {
        let response = self
            .send(
                HttpRequest::get(self.repo_url(&format!("git/ref/heads/{}", self.branch))),
                &format!("refs/heads/{}", self.branch),
            )
            .await?;
        Ok(response.json::<RefResponse>()?.object.sha)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let response = self.contents(path).await?;
        let content: ContentResponse = response.json().map_err(|_| {
            SheetSyncError::Other(format!("{path} is not a file"))
        })?;
        let packed: String = content.content.split_whitespace().collect();
        STANDARD
            .decode(packed)
            .map_err(|e| SheetSyncError::Other(format!("bad content encoding for {path}: {e}")))
    }

    async fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        let response = match self.contents(path).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let entries: Vec<ContentEntry> = response.json().map_err(|_| {
            SheetSyncError::Other(format!("{path} is not a directory"))
        })?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "dir")
            .map(|e| e.name)
            .collect())
    }

    async fn list_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for page in 1.. {
            let url = self.repo_url(&format!("branches?per_page={BRANCH_PAGE}&page={page}"));
            let batch: Vec<BranchEntry> = self.send(HttpRequest::get(url), "branches").await?.json()?;
            let last = batch.len() < BRANCH_PAGE;
            names.extend(batch.into_iter().map(|b| b.name));
            if last {
                break;
            }
        }
        names.sort();
        Ok(names)
    }

    async fn publish_batch(
        &self,
        entries: &[CommitEntry],
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        let changes: Vec<TreeChange<'_>> = entries
            .iter()
            .map(|e| (e.path.as_str(), Some(e.content.as_slice())))
            .collect();
        self.commit_changes(&changes, message, progress).await
    }

    async fn remove_batch(
        &self,
        paths: &[String],
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        let changes: Vec<TreeChange<'_>> = paths.iter().map(|p| (p.as_str(), None)).collect();
        self.commit_changes(&changes, message, progress).await
    }
}
