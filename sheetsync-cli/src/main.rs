mod orchestrator;
mod progress;

use clap::{Args, Parser, Subcommand, ValueEnum};
use orchestrator::{convert_files, resolve_credentials, CliResult, ConvertOptions, PublishOrchestrator};
use progress::ConsoleProgress;
use sheetsync::config::CONFIG_FILE;
use sheetsync::remote::{self, ReqwestTransport};
use sheetsync::{Config, EnumAccumulator};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// sheetsync: convert typed spreadsheets into SQLite stores and Rust records,
/// and publish them to a versioned data repository
#[derive(Parser)]
#[command(name = "sheetsync", version, about)]
struct Cli {
    /// Project configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Remote branch to work on (default: the configured branch)
    #[arg(long)]
    branch: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

/// Credentials for the remote. Environment variables are used when omitted.
#[derive(Args, Default)]
struct CredentialArgs {
    /// Access token for the tree-commit host
    #[arg(long)]
    token: Option<String>,
    /// Username for the multipart host
    #[arg(long)]
    username: Option<String>,
    /// App password for the multipart host
    #[arg(long)]
    app_password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Convert source files into stores and generated code
    Convert {
        /// Source files (default: the configured sources)
        files: Vec<PathBuf>,
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Convert source files and publish them as the next version
    Publish {
        /// Source files (default: the configured sources)
        files: Vec<PathBuf>,
        /// Show what would be committed without pushing anything
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Remove superseded versions from the remote
    Clean {
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Print the remote version manifest
    Versions {
        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// List the branches of the remote repository
    Branches {
        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(execute(cli))
}

async fn execute(cli: Cli) -> CliResult<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(branch) = &cli.branch {
        config.override_branch(branch)?;
    }
    let root = project_root(&cli.config);
    let options = ConvertOptions {
        multi_sheet: config.multi_sheet,
        db_dir: root.join(&config.output.db_dir),
        code_dir: root.join(&config.output.code_dir),
    };
    let progress = ConsoleProgress;

    match cli.command {
        Command::Convert { files, credentials } => {
            let files = source_files(&config, &root, files)?;
            let report = match config.remote.as_ref().filter(|r| r.shared_enums) {
                Some(_) => {
                    let orchestrator = connect(&config, credentials).await?;
                    orchestrator.convert(&files, &options, true, &progress).await?
                }
                None => convert_files(&files, &options, EnumAccumulator::new(), &progress)?,
            };
            print_output(&serde_json::to_value(&report)?, &cli.format)?;
        }

        Command::Publish {
            files,
            dry_run,
            credentials,
        } => {
            let files = source_files(&config, &root, files)?;
            let shared_enums = config.remote()?.shared_enums;
            let orchestrator = connect(&config, credentials).await?;
            let converted = orchestrator
                .convert(&files, &options, shared_enums, &progress)
                .await?;
            let published = orchestrator
                .publish(&files, &options, dry_run, &progress)
                .await?;
            print_output(
                &serde_json::json!({
                    "convert": converted,
                    "publish": published,
                }),
                &cli.format,
            )?;
        }

        Command::Clean { credentials } => {
            let orchestrator = connect(&config, credentials).await?;
            let report = orchestrator.clear_old_versions(&progress).await?;
            print_output(
                &serde_json::json!({
                    "removed": report.removed,
                    "head": report.head,
                }),
                &cli.format,
            )?;
        }

        Command::Versions { credentials } => {
            let orchestrator = connect(&config, credentials).await?;
            let versions = orchestrator.versions().await?;
            print_output(&serde_json::to_value(versions)?, &cli.format)?;
        }

        Command::Branches { credentials } => {
            let orchestrator = connect(&config, credentials).await?;
            let report = orchestrator.branches().await?;
            print_output(&serde_json::to_value(report)?, &cli.format)?;
        }
    }

    Ok(())
}

/// Directory that relative paths in the configuration are resolved against.
fn project_root(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn source_files(config: &Config, root: &Path, files: Vec<PathBuf>) -> CliResult<Vec<PathBuf>> {
    let files = if files.is_empty() {
        config.resolve_sources(root)?
    } else {
        files
    };
    if files.is_empty() {
        return Err("no source files: pass FILES or set `sources` in the configuration".into());
    }
    Ok(files)
}

async fn connect(config: &Config, args: CredentialArgs) -> CliResult<PublishOrchestrator> {
    let remote_config = config.remote()?;
    let credentials = resolve_credentials(
        remote_config.backend,
        args.token,
        args.username,
        args.app_password,
        |name| std::env::var(name).ok(),
    )?;

    let backend = remote::connect(remote_config, Arc::new(ReqwestTransport::new()));
    let mut orchestrator = PublishOrchestrator::new(backend, remote_config.layout());
    let user = orchestrator.authenticate(&credentials).await?;
    log::info!(
        "Signed in as {} on {}/{}",
        user.login,
        remote_config.owner,
        remote_config.repository
    );
    Ok(orchestrator)
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}
