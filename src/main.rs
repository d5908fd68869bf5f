use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

use filepeek::{
    config::{plugins_config_path, Settings},
    plugin::{find_plugin, generate_plugin_id, merge_with_defaults, PluginDescriptor},
    plugin_store::{edit_plugin, FilePluginStore, PluginConfigStore},
    preview::{choose_viewer, decode_result, format_size, FileNode, PreviewContent, ViewerChoice},
    telemetry::init_tracing,
    viewer::{ChunkCache, StreamingRenderer},
    FileBlob, JobRequest, ModuleLoader, Worker, WorkerMessage,
};

/// Preview files through WebAssembly plugins or a streaming hex view
#[derive(Parser, Debug)]
#[command(name = "filepeek", version)]
struct Cli {
    /// Plugin configuration record (default: <data dir>/filepeek/plugins.json)
    #[arg(long, global = true, value_name = "path")]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick a viewer for the file the way the UI does and show it
    Open {
        file: PathBuf,
        /// Rows to print when falling back to the hex view
        #[arg(long, default_value_t = 16)]
        rows: u64,
    },
    /// Run one plugin on a file and print its raw result
    Run {
        file: PathBuf,
        #[arg(long, value_name = "id")]
        plugin: String,
    },
    /// Hex dump through the chunked viewer
    Hex {
        file: PathBuf,
        /// First row to print
        #[arg(long, default_value_t = 0)]
        row: u64,
        #[arg(long, default_value_t = 32)]
        rows: u64,
    },
    /// Manage user-configured plugins
    Plugins {
        #[command(subcommand)]
        action: PluginsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PluginsAction {
    /// Built-in and user plugins, in lookup order
    List,
    Add {
        #[arg(long)]
        url: String,
        #[arg(long = "entry", value_name = "function")]
        entry_function: String,
        /// Explicit id (default: generated)
        #[arg(long)]
        id: Option<String>,
    },
    /// Change a user plugin's URL or entry function
    Edit {
        id: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "entry", value_name = "function")]
        entry_function: Option<String>,
    },
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    if let Err(err) = dotenv() {
        tracing::debug!(target = "filepeek", error = %err, "no .env loaded");
    }
    let cli = Cli::parse();
    let store = FilePluginStore::new(cli.store.clone().unwrap_or_else(plugins_config_path));

    match cli.command {
        Command::Open { file, rows } => open(&store, file, rows).await,
        Command::Run { file, plugin } => {
            let plugins = merge_with_defaults(store.load());
            let plugin = find_plugin(&plugins, &plugin)
                .cloned()
                .with_context(|| format!("unknown plugin '{plugin}'"))?;
            let blob = open_blob(&file).await?;
            let result = run_plugin(blob, plugin).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Hex { file, row, rows } => {
            let blob = open_blob(&file).await?;
            hex_dump(blob, row, rows).await
        }
        Command::Plugins { action } => manage_plugins(&store, action),
    }
}

async fn open_blob(path: &Path) -> Result<FileBlob> {
    FileBlob::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))
}

async fn open(store: &FilePluginStore, path: PathBuf, rows: u64) -> Result<()> {
    let blob = open_blob(&path).await?;
    println!("{}  {}  {}", blob.name, blob.mime, format_size(blob.size()));
    let plugins = merge_with_defaults(store.load());
    match choose_viewer(&blob.name, &blob.mime, &plugins) {
        ViewerChoice::Image => {
            println!("(image: rendered natively, no plugin needed)");
            Ok(())
        }
        ViewerChoice::Plugin(plugin) => {
            let result = run_plugin(blob, plugin).await?;
            print_preview(&result);
            Ok(())
        }
        ViewerChoice::Hex => hex_dump(blob, 0, rows).await,
    }
}

/// One job through a fresh worker.
async fn run_plugin(blob: FileBlob, plugin: PluginDescriptor) -> Result<serde_json::Value> {
    let settings = Settings::from_env();
    let loader = ModuleLoader::from_settings(&settings).context("set up module loader")?;
    let mut worker = Worker::spawn(Arc::new(loader));

    match worker.next_message().await {
        Some(WorkerMessage::Ready) => {}
        other => bail!("worker did not start: {other:?}"),
    }
    worker
        .submit(JobRequest::new(blob, plugin))
        .await
        .context("submit job")?;
    let reply = worker.next_message().await;
    worker.shutdown().await;
    match reply {
        Some(WorkerMessage::Result(value)) => Ok(value),
        Some(WorkerMessage::Error(message)) => bail!("{message}"),
        other => bail!("unexpected worker reply: {other:?}"),
    }
}

fn print_preview(result: &serde_json::Value) {
    match decode_result(result) {
        PreviewContent::Text { content, language } => {
            println!("--- {language} ---");
            println!("{content}");
        }
        PreviewContent::Tree { root } => print_tree(&root, 0),
        PreviewContent::Unknown(kind) => {
            println!("Unknown Result Type: {kind}");
            println!("{result:#}");
        }
    }
}

fn print_tree(node: &FileNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match (node.is_dir(), node.size) {
        (true, _) => println!("{indent}{}/", node.name),
        (false, Some(size)) => println!("{indent}{}  ({})", node.name, format_size(size)),
        (false, None) => println!("{indent}{}", node.name),
    }
    for child in node.children.iter().flatten() {
        print_tree(child, depth + 1);
    }
}

async fn hex_dump(blob: FileBlob, row: u64, rows: u64) -> Result<()> {
    let settings = Settings::from_env();
    let renderer = StreamingRenderer::new(Arc::new(ChunkCache::new(settings.chunk_cache_max)));
    renderer.set_file(blob.source.clone());
    let total = renderer.row_count();
    if total == 0 || rows == 0 {
        return Ok(());
    }
    let first = row.min(total - 1);
    let last = first.saturating_add(rows - 1).min(total - 1);
    renderer
        .on_visible_range(first, last)
        .await
        .with_context(|| format!("read {}", blob.name))?;
    for line in renderer.render_rows(first..=last) {
        println!("{line}");
    }
    Ok(())
}

fn manage_plugins(store: &FilePluginStore, action: PluginsAction) -> Result<()> {
    match action {
        PluginsAction::List => {
            for plugin in merge_with_defaults(store.load()) {
                println!("{}\t{}\t{}", plugin.id, plugin.url, plugin.entry_function);
            }
        }
        PluginsAction::Add {
            url,
            entry_function,
            id,
        } => {
            let mut plugins = store.load();
            let id = id.unwrap_or_else(generate_plugin_id);
            if plugins.iter().any(|p| p.id == id) {
                bail!("plugin '{id}' already exists");
            }
            plugins.push(PluginDescriptor::new(id.clone(), url, entry_function));
            store.save(&plugins)?;
            println!("{id}");
        }
        PluginsAction::Edit {
            id,
            url,
            entry_function,
        } => {
            if url.is_none() && entry_function.is_none() {
                bail!("nothing to change; pass --url and/or --entry");
            }
            let plugin = edit_plugin(store, &id, url, entry_function)?;
            println!("{}\t{}\t{}", plugin.id, plugin.url, plugin.entry_function);
        }
        PluginsAction::Remove { id } => {
            let mut plugins = store.load();
            let before = plugins.len();
            plugins.retain(|p| p.id != id);
            if plugins.len() == before {
                bail!("no user plugin '{id}'");
            }
            store.save(&plugins)?;
        }
    }
    Ok(())
}
