//! In-memory git host for tests.
//!
//! [`MockGitHost`] answers both the git-data dialect used by
//! [`TreeCommitBackend`](super::TreeCommitBackend) and the `src` endpoint used
//! by [`MultipartCommitBackend`](super::MultipartCommitBackend). Objects are
//! content-addressed with SHA-256, trees are full path snapshots, and a branch
//! only moves when a ref update or `src` commit succeeds.
//!
//! ```rust,ignore
//! let host = Arc::new(MockGitHost::new("main").with_token("secret"));
//! host.fail_on(Method::Post, "git/blobs", 1); // second blob upload fails
//! ```

use super::http::{
    basic_auth, transient, FormValue, HttpBody, HttpRequest, HttpResponse, HttpTransport, Method,
};
use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const MOCK_ORIGIN: &str = "https://mock.host";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommit {
    pub tree: String,
    pub parents: Vec<String>,
    pub message: String,
    pub author: Option<String>,
}

struct Failure {
    method: Method,
    fragment: String,
    skip: usize,
}

#[derive(Default)]
struct HostState {
    default_branch: String,
    blobs: HashMap<String, Vec<u8>>,
    /// Tree id to `path -> blob id`.
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, MockCommit>,
    branches: HashMap<String, String>,
    failures: Vec<Failure>,
    requests: Vec<String>,
    sequence: u64,
}

fn digest(kind: &str, parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

impl HostState {
    fn store_blob(&mut self, content: Vec<u8>) -> String {
        let sha = digest("blob", &[&content]);
        self.blobs.insert(sha.clone(), content);
        sha
    }

    fn store_tree(&mut self, entries: BTreeMap<String, String>) -> String {
        let mut listing = Vec::new();
        for (path, blob) in &entries {
            listing.extend_from_slice(path.as_bytes());
            listing.push(0);
            listing.extend_from_slice(blob.as_bytes());
            listing.push(b'\n');
        }
        let sha = digest("tree", &[&listing]);
        self.trees.insert(sha.clone(), entries);
        sha
    }

    fn store_commit(&mut self, commit: MockCommit) -> String {
        self.sequence += 1;
        let sequence = self.sequence.to_string();
        let parents = commit.parents.join(",");
        let sha = digest(
            "commit",
            &[
                commit.tree.as_bytes(),
                parents.as_bytes(),
                commit.message.as_bytes(),
                sequence.as_bytes(),
            ],
        );
        self.commits.insert(sha.clone(), commit);
        sha
    }

    /// Tree snapshot of a branch name or commit id.
    fn snapshot(&self, commitish: &str) -> Option<&BTreeMap<String, String>> {
        let commit = self.branches.get(commitish).map(String::as_str).unwrap_or(commitish);
        let tree = &self.commits.get(commit)?.tree;
        self.trees.get(tree)
    }

    fn content(&self, blob: &str) -> Vec<u8> {
        self.blobs.get(blob).cloned().unwrap_or_default()
    }
}

/// Immediate children of `dir` in a snapshot: name to is-directory.
fn children(snapshot: &BTreeMap<String, String>, dir: &str) -> BTreeMap<String, bool> {
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    };
    let mut out = BTreeMap::new();
    for path in snapshot.keys() {
        if let Some(rest) = path.strip_prefix(&prefix) {
            match rest.split_once('/') {
                Some((sub, _)) => {
                    out.insert(sub.to_string(), true);
                }
                None => {
                    out.entry(rest.to_string()).or_insert(false);
                }
            }
        }
    }
    out
}

fn status(code: u16, message: &str) -> HttpResponse {
    HttpResponse::json_value(code, &json!({ "message": message }))
}

fn not_found() -> HttpResponse {
    status(404, "Not Found")
}

/// Base64 wrapped at 60 columns, as the contents API returns it.
fn wrapped_base64(content: &[u8]) -> String {
    let encoded = STANDARD.encode(content);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 60 + 1);
    for (i, c) in encoded.chars().enumerate() {
        if i > 0 && i % 60 == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out.push('\n');
    out
}

/// An in-memory repository host with one or more branches.
pub struct MockGitHost {
    state: Mutex<HostState>,
    token: Option<String>,
    basic: Option<(String, String)>,
    login: String,
    email: String,
}

impl MockGitHost {
    /// A host whose `branch` points at an empty root commit.
    pub fn new(branch: &str) -> Self {
        let mut state = HostState {
            default_branch: branch.to_string(),
            ..HostState::default()
        };
        let tree = state.store_tree(BTreeMap::new());
        let root = state.store_commit(MockCommit {
            tree,
            parents: Vec::new(),
            message: "initial commit".to_string(),
            author: None,
        });
        state.branches.insert(branch.to_string(), root);

        MockGitHost {
            state: Mutex::new(state),
            token: None,
            basic: None,
            login: "mock".to_string(),
            email: "mock@example.com".to_string(),
        }
    }

    /// Accept `Authorization: Bearer {token}`.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Accept basic auth with these credentials.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.basic = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_identity(mut self, login: &str, email: &str) -> Self {
        self.login = login.to_string();
        self.email = email.to_string();
        self
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit one file directly onto `branch`, bypassing the API.
    pub fn seed_file(&self, branch: &str, path: &str, content: &[u8]) {
        let mut state = self.state();
        let parent = state.branches.get(branch).cloned();
        let mut snapshot = parent
            .as_deref()
            .and_then(|p| state.snapshot(p))
            .cloned()
            .unwrap_or_default();
        let blob = state.store_blob(content.to_vec());
        snapshot.insert(path.to_string(), blob);
        let tree = state.store_tree(snapshot);
        let commit = state.store_commit(MockCommit {
            tree,
            parents: parent.into_iter().collect(),
            message: format!("seed {path}"),
            author: None,
        });
        state.branches.insert(branch.to_string(), commit);
    }

    /// Make the `nth` (0-based) future request matching `method` and a path
    /// fragment fail at the transport level.
    pub fn fail_on(&self, method: Method, path_fragment: &str, nth: usize) {
        self.state().failures.push(Failure {
            method,
            fragment: path_fragment.to_string(),
            skip: nth,
        });
    }

    pub fn head(&self, branch: &str) -> Option<String> {
        self.state().branches.get(branch).cloned()
    }

    pub fn commit(&self, sha: &str) -> Option<MockCommit> {
        self.state().commits.get(sha).cloned()
    }

    /// Every file visible at the head of `branch`.
    pub fn files(&self, branch: &str) -> BTreeMap<String, Vec<u8>> {
        let state = self.state();
        match state.snapshot(branch) {
            Some(snapshot) => snapshot
                .iter()
                .map(|(path, blob)| (path.clone(), state.content(blob)))
                .collect(),
            None => BTreeMap::new(),
        }
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.files(branch).remove(path)
    }

    /// `"{METHOD} {path}"` of every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    fn authorized(&self, request: &HttpRequest) -> Option<Dialect> {
        let header = request.header_value("Authorization")?;
        if let Some(token) = header.strip_prefix("Bearer ") {
            return (self.token.as_deref() == Some(token)).then_some(Dialect::Bearer);
        }
        let (username, password) = self.basic.as_ref()?;
        (header == basic_auth(username, password)).then_some(Dialect::Basic)
    }

    fn handle(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let without_origin = request
            .url
            .split_once("://")
            .map(|(_, rest)| rest.find('/').map_or("", |i| &rest[i..]))
            .unwrap_or(&request.url);
        let (path, query) = match without_origin.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_origin, None),
        };

        let mut state = self.state();
        state
            .requests
            .push(format!("{} {path}", request.method.as_str()));

        if let Some(pos) = state
            .failures
            .iter()
            .position(|f| f.method == request.method && path.contains(&f.fragment))
        {
            if state.failures[pos].skip == 0 {
                state.failures.remove(pos);
                return Err(transient(format!("connection reset during {path}")));
            }
            state.failures[pos].skip -= 1;
        }

        let Some(dialect) = self.authorized(request) else {
            return Ok(status(401, "Bad credentials"));
        };

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first() == Some(&"2.0") {
            segments.remove(0);
        }

        let response = match (request.method, segments.as_slice()) {
            (Method::Get, ["user"]) => match dialect {
                Dialect::Bearer => HttpResponse::json_value(
                    200,
                    &json!({ "login": self.login, "name": self.login, "email": self.email }),
                ),
                Dialect::Basic => HttpResponse::json_value(
                    200,
                    &json!({ "username": self.login, "display_name": self.login }),
                ),
            },
            (Method::Get, ["user", "emails"]) => HttpResponse::json_value(
                200,
                &json!({ "values": [{ "email": self.email, "is_primary": true }] }),
            ),
            (method, ["repos", _, _, rest @ ..]) => {
                git_data(&mut state, method, rest, query, &request.body)
            }
            (method, ["repositories", _, _, rest @ ..]) => {
                src_api(&mut state, method, rest, &request.body)
            }
            _ => not_found(),
        };
        Ok(response)
    }
}

#[derive(Clone, Copy)]
enum Dialect {
    Bearer,
    Basic,
}

fn git_data(
    state: &mut HostState,
    method: Method,
    rest: &[&str],
    query: Option<&str>,
    body: &HttpBody,
) -> HttpResponse {
    let json_body = match body {
        HttpBody::Json(value) => value.clone(),
        _ => Value::Null,
    };

    match (method, rest) {
        (Method::Get, ["branches"]) => {
            let page = query
                .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("page=")))
                .and_then(|p| p.parse::<usize>().ok())
                .unwrap_or(1);
            let branches: Vec<Value> = if page > 1 {
                Vec::new()
            } else {
                state
                    .branches
                    .iter()
                    .map(|(name, sha)| json!({ "name": name, "commit": { "sha": sha } }))
                    .collect()
            };
            HttpResponse::json_value(200, &Value::Array(branches))
        }
        (Method::Get, ["git", "ref", "heads", branch @ ..]) => {
            let branch = branch.join("/");
            match state.branches.get(&branch) {
                Some(sha) => HttpResponse::json_value(
                    200,
                    &json!({
                        "ref": format!("refs/heads/{branch}"),
                        "object": { "sha": sha, "type": "commit" },
                    }),
                ),
                None => not_found(),
            }
        }
        (Method::Get, ["git", "commits", sha]) => match state.commits.get(*sha) {
            Some(commit) => {
                let parents: Vec<Value> =
                    commit.parents.iter().map(|p| json!({ "sha": p })).collect();
                HttpResponse::json_value(
                    200,
                    &json!({
                        "sha": sha,
                        "tree": { "sha": commit.tree },
                        "message": commit.message,
                        "parents": parents,
                    }),
                )
            }
            None => not_found(),
        },
        (Method::Post, ["git", "blobs"]) => {
            let content = json_body["content"].as_str().unwrap_or_default();
            let bytes = if json_body["encoding"] == "base64" {
                match STANDARD.decode(content) {
                    Ok(bytes) => bytes,
                    Err(_) => return status(400, "invalid base64"),
                }
            } else {
                content.as_bytes().to_vec()
            };
            let sha = state.store_blob(bytes);
            HttpResponse::json_value(201, &json!({ "sha": sha }))
        }
        (Method::Post, ["git", "trees"]) => {
            let mut snapshot = match json_body["base_tree"].as_str() {
                Some(base) => match state.trees.get(base) {
                    Some(tree) => tree.clone(),
                    None => return status(422, "base_tree not found"),
                },
                None => BTreeMap::new(),
            };
            let entries = json_body["tree"].as_array().cloned().unwrap_or_default();
            for entry in entries {
                let Some(path) = entry["path"].as_str() else {
                    return status(422, "tree entry without path");
                };
                match entry["sha"].as_str() {
                    Some(blob) if state.blobs.contains_key(blob) => {
                        snapshot.insert(path.to_string(), blob.to_string());
                    }
                    Some(_) => return status(422, "blob not found"),
                    None => {
                        snapshot.remove(path);
                    }
                }
            }
            let sha = state.store_tree(snapshot);
            HttpResponse::json_value(201, &json!({ "sha": sha }))
        }
        (Method::Post, ["git", "commits"]) => {
            let tree = json_body["tree"].as_str().unwrap_or_default().to_string();
            if !state.trees.contains_key(&tree) {
                return status(422, "tree not found");
            }
            let parents: Vec<String> = json_body["parents"]
                .as_array()
                .map(|ps| ps.iter().filter_map(|p| p.as_str().map(String::from)).collect())
                .unwrap_or_default();
            if parents.iter().any(|p| !state.commits.contains_key(p)) {
                return status(422, "parent not found");
            }
            let sha = state.store_commit(MockCommit {
                tree,
                parents,
                message: json_body["message"].as_str().unwrap_or_default().to_string(),
                author: None,
            });
            HttpResponse::json_value(201, &json!({ "sha": sha }))
        }
        (Method::Patch, ["git", "refs", "heads", branch @ ..]) => {
            let sha = json_body["sha"].as_str().unwrap_or_default().to_string();
            if !state.commits.contains_key(&sha) {
                return status(422, "commit not found");
            }
            state.branches.insert(branch.join("/"), sha.clone());
            HttpResponse::json_value(200, &json!({ "object": { "sha": sha } }))
        }
        (Method::Get, ["contents", path @ ..]) => {
            let branch = query
                .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("ref=")))
                .map(str::to_string)
                .unwrap_or_else(|| state.default_branch.clone());
            let path = path.join("/");
            let Some(snapshot) = state.snapshot(&branch) else {
                return not_found();
            };
            if let Some(blob) = snapshot.get(&path) {
                let name = super::file_name_of(&path);
                return HttpResponse::json_value(
                    200,
                    &json!({
                        "type": "file",
                        "name": name,
                        "path": path,
                        "encoding": "base64",
                        "content": wrapped_base64(&state.content(blob)),
                    }),
                );
            }
            let listing: Vec<Value> = children(snapshot, &path)
                .into_iter()
                .map(|(name, is_dir)| {
                    let full = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{path}/{name}")
                    };
                    json!({
                        "type": if is_dir { "dir" } else { "file" },
                        "name": name,
                        "path": full,
                    })
                })
                .collect();
            if listing.is_empty() {
                not_found()
            } else {
                HttpResponse::json_value(200, &Value::Array(listing))
            }
        }
        _ => not_found(),
    }
}

fn src_api(state: &mut HostState, method: Method, rest: &[&str], body: &HttpBody) -> HttpResponse {
    match (method, rest) {
        (Method::Get, ["refs", "branches"]) => {
            let values: Vec<Value> = state
                .branches
                .iter()
                .map(|(name, hash)| json!({ "name": name, "target": { "hash": hash } }))
                .collect();
            HttpResponse::json_value(200, &json!({ "values": values, "page": 1 }))
        }
        (Method::Get, ["refs", "branches", branch @ ..]) => {
            let branch = branch.join("/");
            match state.branches.get(&branch) {
                Some(hash) => HttpResponse::json_value(
                    200,
                    &json!({ "name": branch, "target": { "hash": hash } }),
                ),
                None => not_found(),
            }
        }
        (Method::Post, ["src"]) => {
            let HttpBody::Multipart(parts) = body else {
                return status(400, "expected multipart body");
            };
            src_commit(state, parts)
        }
        (Method::Get, ["src", commitish, path @ ..]) => {
            let path = path.join("/");
            let Some(snapshot) = state.snapshot(commitish) else {
                return not_found();
            };
            if let Some(blob) = snapshot.get(&path) {
                return HttpResponse::new(200, state.content(blob));
            }
            let values: Vec<Value> = children(snapshot, &path)
                .into_iter()
                .map(|(name, is_dir)| {
                    let full = if path.is_empty() {
                        name
                    } else {
                        format!("{path}/{name}")
                    };
                    json!({
                        "type": if is_dir { "commit_directory" } else { "commit_file" },
                        "path": full,
                    })
                })
                .collect();
            if values.is_empty() {
                not_found()
            } else {
                HttpResponse::json_value(200, &json!({ "values": values, "page": 1 }))
            }
        }
        _ => not_found(),
    }
}

fn src_commit(state: &mut HostState, parts: &[super::http::FormPart]) -> HttpResponse {
    let mut message = String::new();
    let mut author = None;
    let mut parent = None;
    let mut branch = state.default_branch.clone();
    let mut removals = Vec::new();
    let mut files = Vec::new();

    for part in parts {
        match (&part.value, part.name.as_str()) {
            (FormValue::Text(v), "message") => message = v.clone(),
            (FormValue::Text(v), "author") => author = Some(v.clone()),
            (FormValue::Text(v), "parents") => parent = Some(v.clone()),
            (FormValue::Text(v), "branch") => branch = v.clone(),
            (FormValue::Text(v), "files") => removals.push(v.clone()),
            (FormValue::Text(v), name) => files.push((name.to_string(), v.as_bytes().to_vec())),
            (FormValue::File { content, .. }, name) => {
                files.push((name.to_string(), content.clone()))
            }
        }
    }

    let parent = match parent.or_else(|| state.branches.get(&branch).cloned()) {
        Some(parent) => parent,
        None => return status(400, "no parent commit"),
    };
    let Some(mut snapshot) = state.snapshot(&parent).cloned() else {
        return status(400, "parent not found");
    };

    for path in removals {
        snapshot.remove(&path);
    }
    for (path, content) in files {
        let blob = state.store_blob(content);
        snapshot.insert(path, blob);
    }

    let tree = state.store_tree(snapshot);
    let sha = state.store_commit(MockCommit {
        tree,
        parents: vec![parent],
        message,
        author,
    });
    state.branches.insert(branch, sha.clone());

    let mut response = HttpResponse::new(201, Vec::new());
    response.headers.push((
        "Location".to_string(),
        format!("{MOCK_ORIGIN}/2.0/repositories/mock/mock/commit/{sha}"),
    ));
    response
}

#[async_trait::async_trait]
impl HttpTransport for MockGitHost {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.handle(&request)
    }
}
