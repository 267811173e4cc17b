//! reel-sync command line

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use reel_sync::ai::AnthropicClient;
use reel_sync::model::{
    AssetId, FolderId, NodeMetadata, NodeRef, Project, ProjectInfo, RemoteId, SuggestionId,
    SyncStatus, UploadStatus,
};
use reel_sync::remote::{FrameioClient, InMemoryRemote, RemoteHierarchy};
use reel_sync::scan::import_directory;
use reel_sync::utils::format_size;
use reel_sync::{
    AppConfig, CancelToken, ProjectStore, SuggestionMerger, SyncEngine, UploadCoordinator,
};

#[derive(Parser)]
#[command(name = "reel-sync")]
#[command(about = "Sync film-production projects with Frame.io", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check credentials and the connection to the media service
    Check,

    /// Create a new project file
    Init {
        /// Project file, or a bare name stored in the data directory
        file: String,

        /// Project name
        name: String,

        /// Import sequences, shots and files from a local directory
        #[arg(long)]
        from_dir: Option<PathBuf>,

        /// Start with Sequences/, Scripts/ and Media/ folders
        #[arg(long)]
        layout: bool,

        #[command(flatten)]
        info: InfoArgs,
    },

    /// Change the project's description, genre, director or producer
    Info {
        file: String,

        #[command(flatten)]
        info: InfoArgs,
    },

    /// Set the description, tags or duration of a folder or asset
    Describe {
        file: String,

        /// Folder or asset id
        node: String,

        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Add a local file as an asset of a folder
    Add {
        file: String,

        /// Folder id
        folder: String,

        source: PathBuf,

        /// Asset name; defaults to the source file name
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Import sequences, shots and files from a local directory
    Import { file: String, dir: PathBuf },

    /// Show the project tree with sync and upload state
    Status { file: String },

    /// Create missing folders and push renames to the media service
    Sync {
        file: String,

        /// Run against an in-memory copy of the remote; nothing is saved
        #[arg(long)]
        dry_run: bool,
    },

    /// Upload pending assets into synced folders
    Upload {
        file: String,

        /// Run against an in-memory copy of the remote; nothing is saved
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare synced folders with what the media service holds
    Audit { file: String },

    /// Ask for naming suggestions
    Suggest {
        file: String,

        /// Limit suggestions to the subtree of this folder id
        #[arg(long)]
        folder: Option<String>,
    },

    /// Apply a naming suggestion
    Accept { file: String, suggestion: String },

    /// Discard a naming suggestion
    Reject { file: String, suggestion: String },

    /// Resolve a folder conflict
    Resolve {
        file: String,

        folder: String,

        /// Bind the folder to an existing remote node
        #[arg(long, conflicts_with = "take_remote")]
        adopt: Option<String>,

        /// Take the name the folder was given remotely
        #[arg(long)]
        take_remote: bool,
    },

    /// Reset failed uploads so the next upload tries them again
    RetryUploads { file: String },
}

#[derive(Args)]
struct InfoArgs {
    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    genre: Option<String>,

    #[arg(long)]
    director: Option<String>,

    #[arg(long)]
    producer: Option<String>,
}

impl InfoArgs {
    /// Overlay the given fields on `current`; an empty value clears a field
    fn apply(self, current: &ProjectInfo) -> ProjectInfo {
        ProjectInfo {
            description: self.description.or_else(|| current.description.clone()),
            genre: self.genre.or_else(|| current.genre.clone()),
            director: self.director.or_else(|| current.director.clone()),
            producer: self.producer.or_else(|| current.producer.clone()),
        }
    }
}

#[derive(Args)]
struct MetadataArgs {
    #[arg(long)]
    description: Option<String>,

    /// Comma-separated; replaces the current tags
    #[arg(long)]
    tags: Option<String>,

    /// Running time in seconds
    #[arg(long)]
    duration: Option<f64>,
}

impl MetadataArgs {
    fn apply(self, current: &NodeMetadata) -> NodeMetadata {
        NodeMetadata {
            description: self.description.or_else(|| current.description.clone()),
            tags: self
                .tags
                .map(|raw| NodeMetadata::parse_tags(&raw))
                .unwrap_or_else(|| current.tags.clone()),
            duration: self.duration.or(current.duration),
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reel_sync=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            std::process::exit(2);
        }
    };

    if let Err(err) = run(cli.command, config).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Check => {
            let remote = FrameioClient::new(config.frameio.clone())?;
            let user = remote.whoami().await.context("Media service check failed")?;
            AnthropicClient::new(config.ai.clone())?;
            println!("Media service: connected as {}", user);
            println!("Suggestion model: {}", config.ai.model);
            if config.frameio.team_id.is_none() {
                println!("Note: FRAMEIO_TEAM_ID is not set; new projects can't be created remotely");
            }
        }

        Commands::Init {
            file,
            name,
            from_dir,
            layout,
            info,
        } => {
            let store = ProjectStore::resolve(&file)?;
            if store.exists() {
                bail!("Project file already exists: {}", store.path().display());
            }
            let mut project = if layout {
                Project::with_film_layout(name)?
            } else {
                Project::new(name)?
            };
            let info = info.apply(project.info());
            project.set_info(info);
            if let Some(dir) = from_dir {
                import_into(&mut project, &dir)?;
            }
            store.save(&project)?;
            println!("Created {} at {}", project.name(), store.path().display());
        }

        Commands::Info { file, info } => {
            let (store, mut project) = load(&file)?;
            let info = info.apply(project.info());
            project.set_info(info);
            store.save(&project)?;
            println!("Updated {}; run sync to push it", project.name());
        }

        Commands::Describe {
            file,
            node,
            metadata,
        } => {
            let (store, mut project) = load(&file)?;
            let node = parse_node(&project, &node)?;
            let current = project.metadata(node).cloned().unwrap_or_default();
            project.set_metadata(node, metadata.apply(&current))?;
            store.save(&project)?;
            println!(
                "Updated {}; run sync to push it",
                project.node_name(node).unwrap_or_default()
            );
        }

        Commands::Add {
            file,
            folder,
            source,
            name,
            metadata,
        } => {
            let (store, mut project) = load(&file)?;
            let folder = parse_folder(&project, &folder)?;
            if !source.is_file() {
                bail!("Not a file: {}", source.display());
            }
            let filename = match name {
                Some(name) => name,
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .context("Source has no file name")?,
            };
            let source = source.canonicalize().unwrap_or(source);
            let id = project.add_asset(folder, &filename, Some(source))?;
            let metadata = metadata.apply(&NodeMetadata::default());
            if !metadata.is_empty() {
                project.set_metadata(NodeRef::Asset(id), metadata)?;
            }
            store.save(&project)?;
            println!("Added {}  {}", filename, id);
        }

        Commands::Import { file, dir } => {
            let (store, mut project) = load(&file)?;
            import_into(&mut project, &dir)?;
            store.save(&project)?;
        }

        Commands::Status { file } => {
            let (_, project) = load(&file)?;
            print_status(&project);
        }

        Commands::Sync { file, dry_run } => {
            let (store, mut project) = load(&file)?;
            let remote = remote_for(&config, &project, dry_run)?;
            let engine = SyncEngine::new(remote).with_cancel(cancel_on_ctrl_c());

            let report = engine.reconcile(&mut project).await;
            println!("{}", report.summary());
            for entry in &report.conflicted {
                let reason = entry.issue.as_ref().map(|i| i.message.as_str()).unwrap_or("");
                println!("  conflict {}: {}", entry.path, reason);
            }
            for entry in &report.skipped {
                println!("  skipped {}", entry.path);
            }
            save_unless_dry_run(&store, &project, dry_run)?;
        }

        Commands::Upload { file, dry_run } => {
            let (store, mut project) = load(&file)?;
            let remote = remote_for(&config, &project, dry_run)?;
            let uploader = UploadCoordinator::new(remote).with_cancel(cancel_on_ctrl_c());

            let report = uploader.upload_pending(&mut project).await;
            println!("{}", report.summary());
            for entry in report.failed.iter().chain(&report.skipped) {
                println!("  {}: {}", entry.path, entry.detail.as_deref().unwrap_or(""));
            }
            save_unless_dry_run(&store, &project, dry_run)?;
        }

        Commands::Audit { file } => {
            let (_, project) = load(&file)?;
            let remote: Arc<dyn RemoteHierarchy> = Arc::new(FrameioClient::new(config.frameio)?);
            let report = SyncEngine::new(remote)
                .with_cancel(cancel_on_ctrl_c())
                .audit(&project)
                .await;

            println!("Checked {} folders", report.folders_checked);
            for entry in &report.missing_remote {
                println!("  missing remotely: {} ({})", entry.path, entry.remote_id);
            }
            for entry in &report.renamed_remote {
                println!(
                    "  renamed remotely: {} -> {}",
                    entry.path,
                    entry.remote_name.as_deref().unwrap_or("?")
                );
            }
            for unknown in &report.unknown_remote {
                println!(
                    "  not in project: {}/{} ({})",
                    unknown.parent_path, unknown.node.name, unknown.node.id
                );
            }
            for (path, err) in &report.unreachable {
                println!("  could not list {}: {}", path, err);
            }
            if report.is_clean() {
                println!("No drift found");
            }
        }

        Commands::Suggest { file, folder } => {
            let (store, mut project) = load(&file)?;
            let subtree = match folder {
                Some(raw) => parse_folder(&project, &raw)?,
                None => project.root(),
            };
            let merger = SuggestionMerger::new(Arc::new(AnthropicClient::new(config.ai)?));

            let created = merger.suggest(&mut project, subtree).await?;
            store.save(&project)?;
            if created.is_empty() {
                println!("No suggestions");
            }
            for suggestion in &created {
                println!(
                    "{}  {} -> {}{}",
                    suggestion.id,
                    suggestion.original_name,
                    suggestion.proposed_name,
                    suggestion
                        .reason
                        .as_deref()
                        .map(|r| format!("  ({})", r))
                        .unwrap_or_default()
                );
            }
        }

        Commands::Accept { file, suggestion } => {
            let (store, mut project) = load(&file)?;
            let id: SuggestionId = suggestion.parse().context("Invalid suggestion id")?;
            let merger = SuggestionMerger::new(Arc::new(AnthropicClient::new(config.ai)?));
            let accepted = merger.accept(&mut project, id)?;
            store.save(&project)?;
            println!(
                "Renamed {} -> {}; run sync to push it",
                accepted.original_name, accepted.proposed_name
            );
        }

        Commands::Reject { file, suggestion } => {
            let (store, mut project) = load(&file)?;
            let id: SuggestionId = suggestion.parse().context("Invalid suggestion id")?;
            let merger = SuggestionMerger::new(Arc::new(AnthropicClient::new(config.ai)?));
            merger.reject(&mut project, id)?;
            store.save(&project)?;
            println!("Rejected {}", id);
        }

        Commands::Resolve {
            file,
            folder,
            adopt,
            take_remote,
        } => {
            let (store, mut project) = load(&file)?;
            let id = parse_folder(&project, &folder)?;
            match (adopt, take_remote) {
                (Some(remote_id), _) => project.adopt_remote_folder(id, RemoteId::new(remote_id))?,
                (None, true) => project.take_remote_name(id)?,
                (None, false) => project.retry_folder(id)?,
            }
            store.save(&project)?;
            println!("Resolved {}", project.folder_path(id).unwrap_or_default());
        }

        Commands::RetryUploads { file } => {
            let (store, mut project) = load(&file)?;
            let failed: Vec<_> = project
                .assets()
                .filter(|a| a.status() == UploadStatus::Failed)
                .map(|a| a.id())
                .collect();
            for id in &failed {
                project.retry_asset(*id)?;
            }
            store.save(&project)?;
            println!("{} failed uploads reset to pending", failed.len());
        }
    }

    Ok(())
}

fn load(file: &str) -> Result<(ProjectStore, Project)> {
    let store = ProjectStore::resolve(file)?;
    let project = store.load()?;
    Ok((store, project))
}

fn save_unless_dry_run(store: &ProjectStore, project: &Project, dry_run: bool) -> Result<()> {
    if dry_run {
        println!("Dry run: project file left unchanged");
        return Ok(());
    }
    store.save(project)?;
    Ok(())
}

fn remote_for(config: &AppConfig, project: &Project, dry_run: bool) -> Result<Arc<dyn RemoteHierarchy>> {
    if dry_run {
        return Ok(Arc::new(InMemoryRemote::mirror(project)));
    }
    Ok(Arc::new(FrameioClient::new(config.frameio.clone())?))
}

/// Cancel the running batch on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current item");
            handle.cancel();
        }
    });
    cancel
}

fn import_into(project: &mut Project, dir: &std::path::Path) -> Result<()> {
    let report = import_directory(project, dir)?;
    println!(
        "Imported {} folders and {} files from {}",
        report.folders_added,
        report.assets_added,
        dir.display()
    );
    for (path, reason) in &report.skipped {
        println!("  skipped {}: {}", path.display(), reason);
    }
    Ok(())
}

/// Folder or asset with the given id
fn parse_node(project: &Project, raw: &str) -> Result<NodeRef> {
    if let Ok(id) = raw.parse::<FolderId>() {
        if project.folder(id).is_some() {
            return Ok(NodeRef::Folder(id));
        }
    }
    if let Ok(id) = raw.parse::<AssetId>() {
        if project.asset(id).is_some() {
            return Ok(NodeRef::Asset(id));
        }
    }
    bail!("No folder or asset with id {}", raw)
}

fn parse_folder(project: &Project, raw: &str) -> Result<FolderId> {
    let id: FolderId = raw.parse().context("Invalid folder id")?;
    if project.folder(id).is_none() {
        bail!("Folder not found: {}", id);
    }
    Ok(id)
}

fn print_status(project: &Project) {
    let stats = project.stats();
    println!(
        "{} ({})",
        project.name(),
        project
            .remote_id()
            .map(|id| format!("remote {}", id))
            .unwrap_or_else(|| "not on the media service yet".to_string())
    );
    println!(
        "Folders: {} synced, {} local, {} in conflict",
        stats.folders_synced, stats.folders_local_only, stats.folders_conflicted
    );
    println!(
        "Assets: {} uploaded, {} pending, {} failed",
        stats.assets_uploaded, stats.assets_pending, stats.assets_failed
    );
    let info = project.info();
    for (label, value) in [
        ("Description", &info.description),
        ("Genre", &info.genre),
        ("Director", &info.director),
        ("Producer", &info.producer),
    ] {
        if let Some(value) = value {
            println!("{}: {}", label, value);
        }
    }
    if project.info_pending() {
        println!("Project info not pushed yet");
    }
    println!();
    print_folder(project, project.root(), 0);

    let open: Vec<_> = project.suggestions().iter().filter(|s| s.is_open()).collect();
    if !open.is_empty() {
        println!();
        println!("Open suggestions:");
        for s in open {
            println!("  {}  {} -> {}", s.id, s.original_name, s.proposed_name);
        }
    }
}

fn print_folder(project: &Project, id: FolderId, depth: usize) {
    let Some(folder) = project.folder(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let marker = match folder.status() {
        SyncStatus::Synced => "synced",
        SyncStatus::LocalOnly => "local",
        SyncStatus::Conflict => "CONFLICT",
    };
    println!("{}{}/  [{}]  {}", indent, folder.name(), marker, id);
    if let Some(issue) = folder.issue() {
        println!("{}  ! {}", indent, issue.message);
    }
    print_metadata(&indent, folder.metadata(), folder.metadata_pending());

    for child in folder.children() {
        match child {
            NodeRef::Folder(child) => print_folder(project, *child, depth + 1),
            NodeRef::Asset(asset_id) => {
                let Some(asset) = project.asset(*asset_id) else {
                    continue;
                };
                let state = match asset.status() {
                    UploadStatus::Pending => "pending",
                    UploadStatus::Uploading => "uploading",
                    UploadStatus::Uploaded => "uploaded",
                    UploadStatus::Failed => "FAILED",
                };
                let size = asset.size().map(format_size).unwrap_or_default();
                println!("{}  {}  [{}] {}  {}", indent, asset.filename(), state, size, asset_id);
                if let Some(err) = asset.last_error() {
                    println!("{}    ! {}", indent, err);
                }
                print_metadata(&format!("{}  ", indent), asset.metadata(), asset.metadata_pending());
            }
        }
    }
}

fn print_metadata(indent: &str, metadata: &NodeMetadata, pending: bool) {
    if metadata.is_empty() {
        return;
    }
    let mut parts = Vec::new();
    if let Some(description) = &metadata.description {
        parts.push(description.clone());
    }
    if !metadata.tags.is_empty() {
        parts.push(format!("#{}", metadata.tags.join(" #")));
    }
    if let Some(duration) = metadata.duration {
        parts.push(format!("{:.1}s", duration));
    }
    let unsent = if pending { "  (not pushed)" } else { "" };
    println!("{}  - {}{}", indent, parts.join(", "), unsent);
}
