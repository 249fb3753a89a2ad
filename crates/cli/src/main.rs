use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pkgnav_metadata::{NodeKind, PackageTree};
use pkgnav_project::{
    DocumentationHost, EditorHost, PackageProject, ProjectConfig, ProjectEvent, ToolSpec,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "pkgnav")]
#[command(about = "Go package metadata loader and navigation tree", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,

    /// Path to the go tool
    #[arg(long, global = true, default_value = "go")]
    go: String,

    /// Extra KEY=VALUE environment for tool runs (repeatable)
    #[arg(long = "env", global = true, value_name = "KEY=VALUE")]
    env: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the package in DIR once and print its navigation tree
    Tree {
        /// Package directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Print the tree as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Keep the tree fresh: reload when the package's sources are saved
    Watch {
        /// Package directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Quiet window for coalescing saves, in milliseconds
        #[arg(long, default_value_t = 1_000)]
        debounce_ms: u64,
    },
}

/// Editor collaborator for a terminal host: "opening" a file prints
/// its path.
struct StdoutEditor;

impl EditorHost for StdoutEditor {
    fn open_file(&self, path: &Path, _focus: bool) {
        println!("open {}", path.display());
    }
}

/// Documentation collaborator that prints a pkg.go.dev URL.
struct PkgGoDevDocs;

impl DocumentationHost for PkgGoDevDocs {
    fn open_reference(&self, import_path: &str) {
        println!("doc https://pkg.go.dev/{import_path}");
    }

    fn bring_to_front(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let env = parse_env(&cli.env)?;
    let base = ToolSpec::go_list(".");
    let mut config = ProjectConfig {
        program: cli.go.clone(),
        args: base.args,
        env,
        debounce: ProjectConfig::default().debounce,
    };

    match cli.command {
        Commands::Tree { dir, json } => run_tree(dir, config, json).await,
        Commands::Watch { dir, debounce_ms } => {
            config.debounce = Duration::from_millis(debounce_ms);
            run_watch(dir, config).await
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default));
    builder.target(env_logger::Target::Stderr).init();
}

fn parse_env(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .with_context(|| format!("--env expects KEY=VALUE, got {pair:?}"))
        })
        .collect()
}

fn open_project(dir: PathBuf, config: ProjectConfig) -> PackageProject {
    PackageProject::with_config(dir, config, Arc::new(StdoutEditor), Arc::new(PkgGoDevDocs))
}

async fn run_tree(dir: PathBuf, config: ProjectConfig, json: bool) -> Result<()> {
    let project = open_project(dir, config);
    let mut events = project.subscribe();
    project.reload().await?;

    match tokio::time::timeout(Duration::from_secs(30), events.recv()).await {
        Ok(Ok(ProjectEvent::TreeReplaced(tree))) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&*tree)?);
            } else {
                print_tree(&tree);
            }
            Ok(())
        }
        Ok(Ok(ProjectEvent::LoadFailed { reason })) => bail!("load failed: {reason}"),
        Ok(Err(_)) => bail!("project event stream closed"),
        Err(_) => bail!("timed out waiting for the go tool"),
    }
}

async fn run_watch(dir: PathBuf, config: ProjectConfig) -> Result<()> {
    let project = open_project(dir.clone(), config);
    let mut events = project.subscribe();
    project.reload().await?;

    // Bridge filesystem events into save notifications; the project
    // ignores paths that are not tracked sources.
    let (fs_tx, mut fs_rx) = mpsc::channel::<PathBuf>(256);
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let Ok(event) = result else {
                return;
            };
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                for path in event.paths {
                    let _ = fs_tx.blocking_send(path);
                }
            }
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!("watching {} for source saves", dir.display());

    loop {
        tokio::select! {
            Some(path) = fs_rx.recv() => {
                project.notify_saved(path).await?;
            }
            event = events.recv() => match event {
                Ok(ProjectEvent::TreeReplaced(tree)) => print_tree(&tree),
                Ok(ProjectEvent::LoadFailed { reason }) => error!("load failed: {reason}"),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("stopping");
                break;
            }
        }
    }
    Ok(())
}

fn print_tree(tree: &PackageTree) {
    println!("{} ({})", tree.import_path, tree.kind.mime_type());
    for node in &tree.children {
        let tag = match node.kind {
            NodeKind::Source => "src",
            NodeKind::Import => "imp",
            NodeKind::Dependency => "dep",
            NodeKind::Root => continue,
        };
        println!("  {tag} {}", node.label);
    }
}
