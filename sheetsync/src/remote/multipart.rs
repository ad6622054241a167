//! Multipart-commit strategy: one `POST .../src` request carries every file
//! and the host applies it as a single commit.

use super::http::{basic_auth, check, FormPart, HttpRequest, HttpResponse, HttpTransport};
use super::{file_name_of, CommitEntry, Credentials, RemoteBackend, UserIdentity};
use crate::error::{Result, SheetSyncError};
use crate::progress::{ProgressSink, StepCounter};
use serde::Deserialize;
use std::sync::Arc;

/// Branch hash, then the commit request.
const STEPS: usize = 2;

pub struct MultipartCommitBackend {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    workspace: String,
    repository: String,
    branch: String,
    authorization: Option<String>,
    identity: Option<UserIdentity>,
}

#[derive(Deserialize)]
struct UserResponse {
    username: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct EmailEntry {
    email: String,
    #[serde(default)]
    is_primary: bool,
}

#[derive(Deserialize)]
struct BranchEntry {
    name: String,
}

#[derive(Deserialize)]
struct Page<T> {
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct BranchTarget {
    hash: String,
}

#[derive(Deserialize)]
struct BranchResponse {
    target: BranchTarget,
}

#[derive(Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

impl MultipartCommitBackend {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: impl Into<String>,
        workspace: &str,
        repository: &str,
        branch: &str,
    ) -> Self {
        MultipartCommitBackend {
            transport,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            workspace: workspace.to_string(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            authorization: None,
            identity: None,
        }
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repositories/{}/{}/{tail}",
            self.api_url, self.workspace, self.repository
        )
    }

    async fn send(&self, request: HttpRequest, what: &str) -> Result<HttpResponse> {
        let authorization = self
            .authorization
            .as_ref()
            .ok_or_else(|| SheetSyncError::Auth("not authenticated".to_string()))?;
        let response = self
            .transport
            .send(request.header("Authorization", authorization.as_str()))
            .await?;
        check(response, what)
    }

    /// `"{login} <{email}>"` of the authenticated user.
    fn author(&self) -> Result<String> {
        match &self.identity {
            Some(UserIdentity {
                login,
                email: Some(email),
                ..
            }) => Ok(format!("{login} <{email}>")),
            _ => Err(SheetSyncError::Auth("not authenticated".to_string())),
        }
    }

    async fn commit_form(
        &self,
        parts: Vec<FormPart>,
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        let author = self.author()?;
        let mut steps = StepCounter::new(progress, STEPS);
        let result = self.run_commit(parts, message, &author, &mut steps).await;
        result.map_err(|e| e.at_step(steps.done(), steps.total()))
    }

    async fn run_commit(
        &self,
        parts: Vec<FormPart>,
        message: &str,
        author: &str,
        steps: &mut StepCounter<'_>,
    ) -> Result<String> {
        steps.label("Get Branch Hash..");
        let parent = self.resolve_head().await?;
        steps.advance();

        let mut form = vec![
            FormPart::text("message", message),
            FormPart::text("author", author),
            FormPart::text("parents", parent.as_str()),
            FormPart::text("branch", self.branch.as_str()),
        ];
        form.extend(parts);

        steps.label("Push Commit..");
        let response = self
            .send(HttpRequest::post(self.repo_url("src")).multipart(form), "src")
            .await?;
        steps.advance();

        let head = match response.header("Location") {
            Some(location) => file_name_of(location).to_string(),
            None => self.resolve_head().await?,
        };
        log::info!("{} now at {}", self.branch, head);
        Ok(head)
    }

    async fn fetch_tree(&self, path: &str) -> Result<Vec<TreeEntry>> {
        let mut url = Some(self.repo_url(&format!(
            "src/{}/{}/",
            self.branch,
            path.trim_matches('/')
        )));
        let mut entries = Vec::new();
        while let Some(next) = url {
            let page: Page<TreeEntry> = self.send(HttpRequest::get(next), path).await?.json()?;
            entries.extend(page.values);
            url = page.next;
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl RemoteBackend for MultipartCommitBackend {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<UserIdentity> {
        let Credentials::Basic { username, password } = credentials else {
            return Err(SheetSyncError::Auth(
                "multipart host needs a username and app password".to_string(),
            ));
        };
        self.authorization = Some(basic_auth(username, password));
        self.identity = None;

        match self.fetch_identity().await {
            Ok(identity) => {
                log::info!("Authenticated as {}", identity.login);
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                self.authorization = None;
                Err(match e {
                    SheetSyncError::NotFound { .. } | SheetSyncError::Remote { .. } => {
                        SheetSyncError::Auth(e.to_string())
                    }
                    other => other,
                })
            }
        }
    }

    async fn resolve_head(&self) -> Result<String> {
        let response = self
            .send(
                HttpRequest::get(self.repo_url(&format!("refs/branches/{}", self.branch))),
                &format!("refs/branches/{}", self.branch),
            )
            .await?;
        Ok(response.json::<BranchResponse>()?.target.hash)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.repo_url(&format!("src/{}/{}", self.branch, path.trim_matches('/')));
        Ok(self.send(HttpRequest::get(url), path).await?.body)
    }

    async fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        let entries = match self.fetch_tree(path).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "commit_directory")
            .map(|e| file_name_of(e.path.trim_end_matches('/')).to_string())
            .collect())
    }

    async fn list_branches(&self) -> Result<Vec<String>> {
        let mut url = Some(self.repo_url("refs/branches?pagelen=100"));
        let mut names = Vec::new();
        while let Some(next) = url {
            let page: Page<BranchEntry> = self
                .send(HttpRequest::get(next), "refs/branches")
                .await?
                .json()?;
            names.extend(page.values.into_iter().map(|b| b.name));
            url = page.next;
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
        let parts = entries
            .iter()
            .map(|e| FormPart::file(e.path.as_str(), file_name_of(&e.path), e.content.clone()))
            .collect();
        self.commit_form(parts, message, progress).await
    }

    async fn remove_batch(
        &self,
        paths: &[String],
        message: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        let parts = paths
            .iter()
            .map(|p| FormPart::text("files", p.as_str()))
            .collect();
        self.commit_form(parts, message, progress).await
    }
}

impl MultipartCommitBackend {
    async fn fetch_identity(&self) -> Result<UserIdentity> {
        let user: UserResponse = self
            .send(HttpRequest::get(format!("{}/user", self.api_url)), "user")
            .await?
            .json()?;
        let emails: Page<EmailEntry> = self
            .send(
                HttpRequest::get(format!("{}/user/emails", self.api_url)),
                "user/emails",
            )
            .await?
            .json()?;

        let email = emails
            .values
            .iter()
            .find(|e| e.is_primary)
            .or_else(|| emails.values.first())
            .map(|e| e.email.clone())
            .ok_or_else(|| {
                SheetSyncError::Auth(format!("no email address for {}", user.username))
            })?;

        Ok(UserIdentity {
            login: user.username,
            name: user.display_name,
            email: Some(email),
        })
    }
}
