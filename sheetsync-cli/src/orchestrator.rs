//! Sequencing of conversion and publishing over a batch of source files.

use serde::Serialize;
use sheetsync::config::{BackendKind, APP_PASSWORD_ENV, TOKEN_ENV, USERNAME_ENV};
use sheetsync::remote::{
    self, fetch_registry, upload_message, CleanupReport, CODE_ROLE, DATA_MESSAGE, VERSION_MESSAGE,
};
use sheetsync::schema::{infer_workbook, CsvSheetSource};
use sheetsync::table_sync::TableStore;
use sheetsync::{
    CommitBatch, CommitEntry, Credentials, EnumAccumulator, ProgressSink, RemoteBackend,
    RemoteLayout, SheetSyncError, UserIdentity, VersionRegistry,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Where converted artifacts are written.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub multi_sheet: bool,
    pub db_dir: PathBuf,
    pub code_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub columns: usize,
    pub rows: usize,
    pub recreated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source: String,
    pub store: String,
    pub tables: Vec<TableReport>,
    /// First schema error of every skipped sheet.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertReport {
    pub files: Vec<FileReport>,
    pub enums: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    /// New branch head; `None` for a dry run.
    pub head: Option<String>,
    pub message: String,
    pub paths: Vec<String>,
    pub versions: BTreeMap<String, i64>,
}

fn file_stem(path: &Path) -> CliResult<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("cannot derive a name from {}", path.display()).into())
}

/// Convert every source file into its store and record sources.
///
/// Files run one after another, each with its own store connection. Enum
/// values are collected per file and merged in file order on top of `seed`,
/// then `enums.rs` and `mod.rs` are written for the whole batch.
pub fn convert_files(
    files: &[PathBuf],
    options: &ConvertOptions,
    seed: EnumAccumulator,
    progress: &dyn ProgressSink,
) -> CliResult<ConvertReport> {
    let mut enums = seed;
    let mut table_names = Vec::new();
    let mut reports = Vec::with_capacity(files.len());

    for (i, file) in files.iter().enumerate() {
        let stem = file_stem(file)?;
        progress.on_label(&format!("Convert {}..", file.display()));

        let mut source = CsvSheetSource::open(file)?;
        let workbook = infer_workbook(&mut source, &stem, options.multi_sheet)?;

        let mut store = TableStore::open_in_dir(&options.db_dir, &stem)?;
        let mut tables = Vec::with_capacity(workbook.sheets.len());
        for sheet in &workbook.sheets {
            let report = store.sync_sheet(sheet, progress)?;
            sheetsync_codegen::write_record(&options.code_dir, sheet)?;
            table_names.push(sheet.table_name.clone());
            tables.push(TableReport {
                table: report.table_name,
                columns: sheet.columns.len(),
                rows: report.rows_inserted,
                recreated: report.recreated,
            });
        }
        let store_path = store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        drop(store);

        enums.merge(&workbook.enums);
        reports.push(FileReport {
            source: file.display().to_string(),
            store: store_path,
            tables,
            errors: workbook.errors.iter().map(|e| e.to_string()).collect(),
        });
        progress.on_progress(i + 1, files.len());
    }

    sheetsync_codegen::write_enums(&options.code_dir, &enums)?;
    sheetsync_codegen::write_mod_index(&options.code_dir, &table_names)?;

    Ok(ConvertReport {
        files: reports,
        enums: enums
            .iter()
            .map(|(key, _)| EnumAccumulator::field_name(key).to_string())
            .collect(),
    })
}

/// Pick credentials for a backend from explicit values or the environment.
pub fn resolve_credentials(
    kind: BackendKind,
    token: Option<String>,
    username: Option<String>,
    app_password: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> CliResult<Credentials> {
    match kind {
        BackendKind::Github => token
            .or_else(|| env(TOKEN_ENV))
            .map(Credentials::Token)
            .ok_or_else(|| format!("missing token: pass --token or set {TOKEN_ENV}").into()),
        BackendKind::Bitbucket => {
            let username = username.or_else(|| env(USERNAME_ENV)).ok_or_else(|| {
                format!("missing username: pass --username or set {USERNAME_ENV}")
            })?;
            let password = app_password.or_else(|| env(APP_PASSWORD_ENV)).ok_or_else(|| {
                format!("missing app password: pass --app-password or set {APP_PASSWORD_ENV}")
            })?;
            Ok(Credentials::Basic { username, password })
        }
    }
}

/// Drives conversion and publishing against one remote backend.
pub struct PublishOrchestrator {
    backend: Box<dyn RemoteBackend>,
    layout: RemoteLayout,
}

impl PublishOrchestrator {
    pub fn new(backend: Box<dyn RemoteBackend>, layout: RemoteLayout) -> Self {
        PublishOrchestrator { backend, layout }
    }

    pub async fn authenticate(&mut self, credentials: &Credentials) -> CliResult<UserIdentity> {
        Ok(self.backend.authenticate(credentials).await?)
    }

    /// Enum values already published in the shared enum file.
    pub async fn seed_enums(&self) -> CliResult<EnumAccumulator> {
        let path = self
            .layout
            .role_path(CODE_ROLE, sheetsync_codegen::ENUMS_FILE);
        match self.backend.read_file(&path).await {
            Ok(bytes) => {
                let source = String::from_utf8(bytes)?;
                Ok(sheetsync_codegen::scan_enums(&source)?)
            }
            Err(e) if e.is_not_found() => Ok(EnumAccumulator::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Convert `files`, seeding enums from the remote when `shared_enums` is set.
    pub async fn convert(
        &self,
        files: &[PathBuf],
        options: &ConvertOptions,
        shared_enums: bool,
        progress: &dyn ProgressSink,
    ) -> CliResult<ConvertReport> {
        let seed = if shared_enums {
            progress.on_label("Read Shared Enums..");
            self.seed_enums().await?
        } else {
            EnumAccumulator::new()
        };
        convert_files(files, options, seed, progress)
    }

    pub async fn load_registry(&self, bootstrap_keys: &[String]) -> CliResult<VersionRegistry> {
        Ok(fetch_registry(self.backend.as_ref(), &self.layout, bootstrap_keys).await?)
    }

    /// Build the commit for `files` without sending it.
    ///
    /// Each source file and its store are staged under the next version of
    /// the file's artifact, generated sources under the code role directory,
    /// and the bumped manifest last. The registry is only changed in memory.
    pub async fn plan_publish(
        &self,
        files: &[PathBuf],
        options: &ConvertOptions,
    ) -> CliResult<(String, Vec<CommitEntry>, VersionRegistry)> {
        if files.is_empty() {
            return Err("no source files to publish".into());
        }
        let stems = files
            .iter()
            .map(|f| file_stem(f))
            .collect::<CliResult<Vec<_>>>()?;
        let mut registry = self.load_registry(&stems).await?;

        let mut data = Vec::new();
        let mut names = Vec::new();
        for (file, stem) in files.iter().zip(&stems) {
            let versioned = registry.preview_next(stem);
            let extension = file
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("csv")
                .to_string();

            let mut artifacts = vec![(file.clone(), extension)];
            let store = options.db_dir.join(format!("{stem}.db"));
            if store.is_file() {
                artifacts.push((store, "db".to_string()));
            }
            for (path, extension) in artifacts {
                let content = std::fs::read(&path)?;
                names.push(format!("{versioned}.{extension}"));
                data.push(CommitEntry::new(
                    self.layout.artifact_path(stem, &versioned, &extension),
                    content,
                ));
            }
        }
        let mut data_batch = CommitBatch::new(upload_message(DATA_MESSAGE, &names));
        data_batch.entries = data;

        let mut code_batch = CommitBatch::new(remote::CODE_MESSAGE);
        for path in generated_sources(&options.code_dir)? {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            code_batch.push(CommitEntry::new(
                self.layout.role_path(CODE_ROLE, &name),
                std::fs::read(&path)?,
            ));
        }

        let mut version_batch = CommitBatch::new(VERSION_MESSAGE);
        version_batch.push(CommitEntry::new(
            self.layout.version_manifest_path(),
            registry.serialize(),
        ));

        let (message, entries) = CommitBatch::flatten(vec![data_batch, code_batch, version_batch]);
        Ok((message, entries, registry))
    }

    /// Publish `files` as one commit and return the new head.
    pub async fn publish(
        &self,
        files: &[PathBuf],
        options: &ConvertOptions,
        dry_run: bool,
        progress: &dyn ProgressSink,
    ) -> CliResult<PublishReport> {
        progress.on_label("Prepare Upload..");
        let (message, entries, registry) = self.plan_publish(files, options).await?;

        let head = if dry_run {
            None
        } else {
            Some(
                self.backend
                    .publish_batch(&entries, &message, progress)
                    .await?,
            )
        };

        Ok(PublishReport {
            head,
            message,
            paths: entries.into_iter().map(|e| e.path).collect(),
            versions: versions_of(&registry),
        })
    }

    pub async fn clear_old_versions(&self, progress: &dyn ProgressSink) -> CliResult<CleanupReport> {
        let registry = self.load_registry(&[]).await?;
        Ok(remote::clear_old_versions(self.backend.as_ref(), &self.layout, &registry, progress).await?)
    }

    pub async fn branches(&self) -> CliResult<BranchReport> {
        Ok(BranchReport {
            current: self.backend.branch().to_string(),
            branches: self.backend.list_branches().await?,
        })
    }

    pub async fn versions(&self) -> CliResult<BTreeMap<String, i64>> {
        match self.backend.read_file(&self.layout.version_manifest_path()).await {
            Ok(bytes) => {
                let registry = VersionRegistry::from_manifest(&String::from_utf8(bytes)?)?;
                Ok(versions_of(&registry))
            }
            Err(SheetSyncError::NotFound { .. }) => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub current: String,
    pub branches: Vec<String>,
}

fn versions_of(registry: &VersionRegistry) -> BTreeMap<String, i64> {
    registry
        .entries()
        .map(|e| (e.key.clone(), e.version))
        .collect()
}

/// `*.rs` files of the code directory, sorted by name.
fn generated_sources(dir: &Path) -> CliResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "rs") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
