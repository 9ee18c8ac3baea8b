use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use vault_core::logging::{LoggingConfig, init_logging};
use vault_core::{
    Collection, Config, Entity, File, FilePatch, Folder, NewFile, NewFolder, NewNote, Note, NotePatch, RecordId,
};
use vault_store::{SearchFilters, VaultStore};

/// Vault - a local store for notes, files and folders
#[derive(Parser, Debug)]
#[command(name = "vault")]
#[command(about = "Versioned local storage for notes, files and folders", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to vault.toml (default: ./vault.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding the configured store path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an example config if missing and create or upgrade the store
    Init,
    /// Show schema version and record counts
    Status {
        /// Only count this collection (notes, files or folders)
        #[arg(value_name = "COLLECTION")]
        collection: Option<Collection>,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        action: NoteCommand,
    },
    /// Manage files
    File {
        #[command(subcommand)]
        action: FileCommand,
    },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderCommand,
    },
    /// List every tag used by notes and files
    Tags {
        #[arg(long, value_name = "OWNER")]
        owner: Option<String>,
    },
    /// Delete every note and file (folders are kept)
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum NoteCommand {
    /// Add a note
    Add {
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_name = "ID")]
        folder: Option<RecordId>,
        /// Mark the content as ciphertext
        #[arg(long)]
        encrypted: bool,
    },
    /// List notes
    List {
        #[arg(long)]
        owner: Option<String>,
        /// Only favorites
        #[arg(long)]
        favorites: bool,
        #[arg(long, value_name = "ID")]
        folder: Option<RecordId>,
    },
    /// Show one note
    Show { id: RecordId },
    /// Update fields of a note
    Update {
        id: RecordId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Replace the tag list
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Option<Vec<String>>,
        #[arg(long, value_name = "ID", conflicts_with = "no_folder")]
        folder: Option<RecordId>,
        /// Remove the note from its folder
        #[arg(long)]
        no_folder: bool,
        #[arg(long)]
        favorite: Option<bool>,
    },
    /// Delete a note
    Delete { id: RecordId },
    /// Search notes by title and tags
    Search {
        /// Case-insensitive title substring
        #[arg(long)]
        text: Option<String>,
        /// Match notes carrying any of these tags
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long)]
        owner: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum FileCommand {
    /// Store a file from disk
    Add {
        path: PathBuf,
        /// Stored name (default: the file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_name = "ID")]
        folder: Option<RecordId>,
        /// Mark the payload as ciphertext
        #[arg(long)]
        encrypted: bool,
    },
    /// List files
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_name = "ID")]
        folder: Option<RecordId>,
    },
    /// Show one file, optionally writing its payload to disk
    Show {
        id: RecordId,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Rename a file
    Rename { id: RecordId, name: String },
    /// Delete a file
    Delete { id: RecordId },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    /// Add a folder
    Add {
        name: String,
        #[arg(long, value_name = "ID")]
        parent: Option<RecordId>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List folders
    List {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete a folder; its contents keep their reference
    Delete { id: RecordId },
    /// List child folders (root folders without an id)
    Children { parent: Option<RecordId> },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("vault.toml"));

    if matches!(cli.command, Commands::Init) {
        write_example_config(&config_path)?;
    }

    let mut config = load_config(&config_path, cli.verbose)?;
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }

    let mut logging = LoggingConfig::from(config.logging.clone());
    if cli.verbose {
        logging = logging.with_level("info");
    }
    let _log_guard = init_logging(Some(logging)).context("Failed to initialize logging")?;

    if cli.verbose {
        println!("{} Store: {}", "Info:".blue().bold(), config.store.path.display());
    }

    let store = VaultStore::open_from_config(&config.store)
        .await
        .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?;

    match cli.command {
        Commands::Init => cmd_init(&store).await?,
        Commands::Status { collection } => cmd_status(&store, collection).await?,
        Commands::Note { action } => cmd_note(&store, action).await?,
        Commands::File { action } => cmd_file(&store, action).await?,
        Commands::Folder { action } => cmd_folder(&store, action).await?,
        Commands::Tags { owner } => cmd_tags(&store, owner.as_deref()).await?,
        Commands::Clear { yes } => cmd_clear(&store, yes).await?,
    }

    store.close().await?;
    Ok(())
}

/// Write the example config unless one already exists
fn write_example_config(path: &Path) -> Result<()> {
    if path.exists() {
        println!("{} Config already exists at {}", "Info:".blue().bold(), path.display());
        return Ok(());
    }

    std::fs::write(path, Config::example()).context("Failed to create config")?;
    println!("{} Created config at {}", "Success:".green().bold(), path.display());
    Ok(())
}

/// Load config from file, falling back to defaults when it is missing
fn load_config(path: &Path, verbose: bool) -> Result<Config> {
    if path.exists() {
        if verbose {
            println!("{} Loading config from {}", "Info:".green().bold(), path.display());
        }
        Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    } else {
        if verbose {
            println!(
                "{} Config not found at {}, using defaults",
                "Warning:".yellow().bold(),
                path.display()
            );
        }
        Ok(Config::default())
    }
}

async fn cmd_init(store: &VaultStore) -> Result<()> {
    let version = store.schema_version().await?;
    println!(
        "{} Store ready at {} (schema v{})",
        "Success:".green().bold(),
        store.path().display(),
        version.to_string().cyan()
    );
    Ok(())
}

/// Show schema version and record counts
async fn cmd_status(store: &VaultStore, only: Option<Collection>) -> Result<()> {
    println!("{}", "Vault Status".green().bold().underline());
    println!();

    println!("{} Store", "Info:".blue().bold());
    println!("  Path: {}", store.path().display().cyan());
    println!(
        "  Schema version: {} (latest {})",
        store.schema_version().await?.to_string().cyan(),
        store.registry().latest_version()
    );

    println!();
    println!("{} Records", "Info:".blue().bold());
    for &collection in Collection::VALUES.iter().filter(|c| only.is_none_or(|only| only == **c)) {
        let count = store.count(collection).await?;
        println!("  {}: {}", collection, count.to_string().cyan());
    }

    Ok(())
}

async fn cmd_note(store: &VaultStore, action: NoteCommand) -> Result<()> {
    match action {
        NoteCommand::Add { title, content, tags, owner, folder, encrypted } => {
            let mut new = NewNote::new(title, content).with_tags(tags).encrypted(encrypted);
            if let Some(owner) = owner {
                new = new.with_owner(owner);
            }
            if let Some(folder) = folder {
                new = new.in_folder(folder);
            }
            let id = store.add::<Note>(new).await?;
            println!("{} Added note {}", "Success:".green().bold(), id.to_string().cyan());
        }
        NoteCommand::List { owner, favorites, folder } => {
            let notes = list_records::<Note>(store, owner.as_deref(), folder, favorites).await?;
            print_notes(&notes);
        }
        NoteCommand::Show { id } => {
            let note = store.get::<Note>(id).await?.with_context(|| format!("Note {id} not found"))?;
            store.touch(Collection::Notes, id).await?;
            let folder = store.resolve_folder(&note).await?;

            println!("{} {}", note.title.bold(), format!("#{}", note.id).dimmed());
            println!("  Tags: {}", note.tags.join(", ").cyan());
            if let Some(owner) = &note.owner_id {
                println!("  Owner: {}", owner);
            }
            match (note.folder_id, folder) {
                (Some(_), Some(folder)) => println!("  Folder: {} (#{})", folder.name, folder.id),
                (Some(id), None) => println!("  Folder: #{} {}", id, "(missing)".yellow()),
                (None, _) => {}
            }
            println!("  Created: {}", note.created_at);
            println!("  Updated: {}", note.updated_at);
            if note.encrypted {
                println!("  {}", "Content is encrypted".yellow());
            }
            println!();
            println!("{}", note.content);
        }
        NoteCommand::Update { id, title, content, tags, folder, no_folder, favorite } => {
            let folder_id = if no_folder { Some(None) } else { folder.map(Some) };
            let patch = NotePatch { title, content, tags, folder_id, favorite, ..Default::default() };
            store.update::<Note>(id, patch).await?;
            println!("{} Updated note {}", "Success:".green().bold(), id.to_string().cyan());
        }
        NoteCommand::Delete { id } => {
            store.delete::<Note>(id).await?;
            println!("{} Deleted note {}", "Success:".green().bold(), id.to_string().cyan());
        }
        NoteCommand::Search { text, tags, owner } => {
            let filters = SearchFilters { text, tags: if tags.is_empty() { None } else { Some(tags) } };
            let notes = store.search::<Note>(owner.as_deref(), &filters).await?;
            print_notes(&notes);
        }
    }
    Ok(())
}

async fn cmd_file(store: &VaultStore, action: FileCommand) -> Result<()> {
    match action {
        FileCommand::Add { path, name, mime, tags, owner, folder, encrypted } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("{} has no file name", path.display()))?,
            };

            let mut new = NewFile::new(name, mime, data).with_tags(tags).encrypted(encrypted);
            if let Some(owner) = owner {
                new = new.with_owner(owner);
            }
            if let Some(folder) = folder {
                new = new.in_folder(folder);
            }
            let id = store.add::<File>(new).await?;
            println!("{} Added file {}", "Success:".green().bold(), id.to_string().cyan());
        }
        FileCommand::List { owner, folder } => {
            let files = list_records::<File>(store, owner.as_deref(), folder, false).await?;
            for file in &files {
                println!(
                    "{:>5}  {}  {}  {}",
                    file.id.to_string().cyan(),
                    file.name.bold(),
                    file.mime_type.dimmed(),
                    format_size(file.size)
                );
            }
            print_count(files.len(), "file");
        }
        FileCommand::Show { id, output } => {
            let file = store.get::<File>(id).await?.with_context(|| format!("File {id} not found"))?;
            store.touch(Collection::Files, id).await?;

            println!("{} {}", file.name.bold(), format!("#{}", file.id).dimmed());
            println!("  Type: {}", file.mime_type);
            println!("  Size: {}", format_size(file.size));
            println!("  Tags: {}", file.tags.join(", ").cyan());
            println!("  Encrypted: {}", file.encrypted);

            if let Some(output) = output {
                tokio::fs::write(&output, &file.data)
                    .await
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!("{} Wrote payload to {}", "Success:".green().bold(), output.display());
            }
        }
        FileCommand::Rename { id, name } => {
            store.update::<File>(id, FilePatch { name: Some(name), ..Default::default() }).await?;
            println!("{} Renamed file {}", "Success:".green().bold(), id.to_string().cyan());
        }
        FileCommand::Delete { id } => {
            store.delete::<File>(id).await?;
            println!("{} Deleted file {}", "Success:".green().bold(), id.to_string().cyan());
        }
    }
    Ok(())
}

/// Records passing every listing filter that was given, in insertion order
async fn list_records<E: Entity>(
    store: &VaultStore, owner: Option<&str>, folder: Option<RecordId>, favorites_only: bool,
) -> Result<Vec<E>> {
    let mut records = match folder {
        Some(folder) => store.in_folder::<E>(folder).await?,
        None if favorites_only => return Ok(store.favorites::<E>(owner).await?),
        None => return Ok(store.list_by_owner::<E>(owner).await?),
    };
    records.retain(|record| {
        owner.is_none_or(|owner| record.owner_id() == Some(owner)) && (!favorites_only || record.is_favorite())
    });
    Ok(records)
}

async fn cmd_folder(store: &VaultStore, action: FolderCommand) -> Result<()> {
    match action {
        FolderCommand::Add { name, parent, owner, description } => {
            let mut new = NewFolder::new(name);
            if let Some(parent) = parent {
                new = new.with_parent(parent);
            }
            if let Some(owner) = owner {
                new = new.with_owner(owner);
            }
            if let Some(description) = description {
                new = new.with_description(description);
            }
            let id = store.add::<Folder>(new).await?;
            println!("{} Added folder {}", "Success:".green().bold(), id.to_string().cyan());
        }
        FolderCommand::List { owner } => {
            let folders = store.list_by_owner::<Folder>(owner.as_deref()).await?;
            print_folders(&folders);
        }
        FolderCommand::Delete { id } => {
            store.delete::<Folder>(id).await?;
            println!("{} Deleted folder {}", "Success:".green().bold(), id.to_string().cyan());
        }
        FolderCommand::Children { parent } => {
            let folders = store.child_folders(parent).await?;
            print_folders(&folders);
        }
    }
    Ok(())
}

async fn cmd_tags(store: &VaultStore, owner: Option<&str>) -> Result<()> {
    let tags = store.all_tags(owner).await?;
    for tag in &tags {
        println!("{}", tag.cyan());
    }
    print_count(tags.len(), "tag");
    Ok(())
}

async fn cmd_clear(store: &VaultStore, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to delete all notes and files without --yes");
    }
    store.clear_all().await?;
    println!("{} Deleted all notes and files", "Success:".green().bold());
    Ok(())
}

fn print_notes(notes: &[Note]) {
    for note in notes {
        let star = if note.is_favorite() { "*" } else { " " };
        println!(
            "{:>5} {} {}  {}",
            note.id.to_string().cyan(),
            star.yellow(),
            note.title.bold(),
            note.tags.join(", ").dimmed()
        );
    }
    print_count(notes.len(), "note");
}

fn print_folders(folders: &[Folder]) {
    for folder in folders {
        let parent = folder.parent_id.map(|p| format!("in #{p}")).unwrap_or_default();
        println!("{:>5}  {}  {}", folder.id.to_string().cyan(), folder.name.bold(), parent.dimmed());
    }
    print_count(folders.len(), "folder");
}

fn print_count(count: usize, noun: &str) {
    let plural = if count == 1 { "" } else { "s" };
    println!("{}", format!("{count} {noun}{plural}").dimmed());
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{size:.1} {}", UNITS[unit]) }
}
