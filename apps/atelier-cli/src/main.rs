mod handlers;

use anyhow::Context;
use atelier_assets::{AssetCatalog, AssetContext, AssetRecord, LiveAssetData};
use atelier_common::{AssetConfig, AssetId, AssetPath, ReadFailurePolicy};
use atelier_storage::{FsStorage, MemoryStorage};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use futures::executor::LocalPool;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// Loader configuration file, looked up in the project directory.
const CONFIG_FILE: &str = "atelier.json";

#[derive(Parser)]
#[command(name = "atelier-cli", about = "CLI tool for atelier asset projects")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Resolve an asset's live asset and print a summary
    Resolve {
        /// Project directory
        project: PathBuf,
        /// Asset id or path relative to the project
        asset: String,
        /// Fail instead of resolving empty when asset data cannot be read
        #[arg(long)]
        strict_reads: bool,
    },
    /// List every asset transitively referenced by an asset
    Refs {
        /// Project directory
        project: PathBuf,
        /// Asset id or path relative to the project
        asset: String,
    },
    /// Print the bundle payload of an asset
    Bundle {
        /// Project directory
        project: PathBuf,
        /// Asset id or path relative to the project
        asset: String,
    },
    /// Resolve a small in-memory project with a reference cycle
    Demo,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut pool = LocalPool::new();
    match cli.command {
        Commands::Info => {
            println!("atelier-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", atelier_common::crate_info());
            println!("storage: {}", atelier_storage::crate_info());
            println!("assets: {}", atelier_assets::crate_info());
        }
        Commands::Resolve {
            project,
            asset,
            strict_reads,
        } => {
            let summary = resolve(&mut pool, &project, &asset, strict_reads)?;
            println!("{summary}");
        }
        Commands::Refs { project, asset } => {
            for id in references(&mut pool, &project, &asset)? {
                println!("{id}");
            }
        }
        Commands::Bundle { project, asset } => {
            let bytes = bundle(&mut pool, &project, &asset)?;
            println!("{} bytes", bytes.len());
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        Commands::Demo => demo(&mut pool)?,
    }

    Ok(())
}

/// Open a project directory: configuration, storage and the assets listed in
/// its settings file.
fn open_project(
    pool: &mut LocalPool,
    project: &Path,
    strict_reads: bool,
) -> anyhow::Result<AssetCatalog> {
    let mut config = AssetConfig::load_or_default(project.join(CONFIG_FILE))
        .with_context(|| format!("reading {CONFIG_FILE} in {}", project.display()))?;
    if strict_reads {
        config.read_failure_policy = ReadFailurePolicy::Propagate;
    }
    let storage = FsStorage::open(project)
        .with_context(|| format!("opening project at {}", project.display()))?;
    let context = AssetContext::new(storage, handlers::registry()?, pool.spawner()).with_config(config);
    let catalog = AssetCatalog::new(context);
    let count = pool.run_until(catalog.load_settings())?;
    tracing::info!(count, project = %project.display(), "opened project");
    Ok(catalog)
}

/// Find an asset by id, then by path. Paths missing from the settings file
/// are registered on the fly.
fn lookup(catalog: &AssetCatalog, asset: &str) -> Rc<AssetRecord> {
    if let Ok(id) = asset.parse::<AssetId>() {
        if let Some(record) = catalog.get_record(id) {
            return record;
        }
    }
    let path = AssetPath::new(asset);
    catalog
        .get_record_by_path(&path)
        .unwrap_or_else(|| catalog.add_asset(path))
}

fn resolve(
    pool: &mut LocalPool,
    project: &Path,
    asset: &str,
    strict_reads: bool,
) -> anyhow::Result<String> {
    let catalog = open_project(pool, project, strict_reads)?;
    let record = lookup(&catalog, asset);
    let data = pool
        .run_until(record.get_live_asset_data())
        .with_context(|| format!("resolving {asset}"))?;
    let summary = describe(&record, &data);
    catalog.dispose();
    Ok(summary)
}

fn references(pool: &mut LocalPool, project: &Path, asset: &str) -> anyhow::Result<Vec<AssetId>> {
    let catalog = open_project(pool, project, false)?;
    let record = lookup(&catalog, asset);
    let ids: Vec<AssetId> =
        pool.run_until(catalog.referenced_ids(record.id()).into_stream().collect());
    Ok(ids)
}

fn bundle(pool: &mut LocalPool, project: &Path, asset: &str) -> anyhow::Result<Vec<u8>> {
    let catalog = open_project(pool, project, false)?;
    let record = lookup(&catalog, asset);
    let bytes = pool
        .run_until(record.bundled_data())
        .with_context(|| format!("bundling {asset}"))?;
    Ok(bytes)
}

fn describe(record: &AssetRecord, data: &LiveAssetData) -> String {
    let mut out = format!(
        "{} [{}] {}",
        record.id(),
        record.asset_type_id().unwrap_or_else(|| "?".to_owned()),
        handlers::summarize(data)
    );
    if let Some(document) = data.live_asset_as::<handlers::Document>() {
        for (id, link) in document.links.borrow().iter() {
            out.push_str(&format!("\n  -> {id}: {link}"));
        }
    }
    out
}

/// Two documents linking to each other plus a note, all in memory.
fn demo(pool: &mut LocalPool) -> anyhow::Result<()> {
    let storage = Rc::new(MemoryStorage::new());
    let context = AssetContext::new(Rc::clone(&storage), handlers::registry()?, pool.spawner());
    let catalog = AssetCatalog::new(context);

    let intro = catalog.add_asset("intro.doc");
    let usage = catalog.add_asset("usage.doc");
    let notes = catalog.add_asset("notes.md");
    storage.insert_json(
        "intro.doc",
        &serde_json::json!({ "title": "Intro", "links": [usage.id(), notes.id()] }),
    );
    storage.insert_json(
        "usage.doc",
        &serde_json::json!({ "title": "Usage", "links": [intro.id()] }),
    );
    storage.insert("notes.md", "Remember to save often.\n");

    let data = pool.run_until(intro.get_live_asset_data())?;
    println!("{}", describe(&intro, &data));
    let data = pool.run_until(usage.get_live_asset_data())?;
    println!("{}", describe(&usage, &data));

    // Rebuilding the note is picked up by the document linking to it.
    notes.destroy_live_asset();
    storage.insert("notes.md", "Save early, save often.\n");
    pool.run_until(notes.get_live_asset_data())?;
    let data = pool.run_until(intro.get_live_asset_data())?;
    println!("after edit: {}", describe(&intro, &data));

    let refs: Vec<AssetId> = pool.run_until(catalog.referenced_ids(intro.id()).collect_all());
    println!("intro references {} assets", refs.len());
    catalog.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_project(dir: &Path) -> (AssetId, AssetId) {
        let doc = AssetId::new();
        let note = AssetId::new();
        let mut assets = serde_json::Map::new();
        assets.insert(doc.to_string(), serde_json::json!({ "path": "guide.doc" }));
        assets.insert(note.to_string(), serde_json::json!({ "path": "notes/todo.md" }));
        let settings = serde_json::json!({ "schemaVersion": 1, "assets": assets });
        std::fs::write(dir.join("assetSettings.json"), settings.to_string()).unwrap();
        std::fs::write(
            dir.join("guide.doc"),
            serde_json::json!({ "title": "Guide", "links": [note] }).to_string(),
        )
        .unwrap();
        std::fs::create_dir_all(dir.join("notes")).unwrap();
        std::fs::write(dir.join("notes/todo.md"), "ship it\n").unwrap();
        (doc, note)
    }

    #[test]
    fn resolve_document_by_id_and_path() {
        let tmp = tempfile::tempdir().unwrap();
        let (doc, note) = write_project(tmp.path());
        let mut pool = LocalPool::new();

        let summary = resolve(&mut pool, tmp.path(), &doc.to_string(), false).unwrap();
        assert!(summary.contains("document \"Guide\" (1 links)"));
        assert!(summary.contains(&format!("-> {note}: note \"ship it\"")));

        let summary = resolve(&mut pool, tmp.path(), "notes/todo.md", false).unwrap();
        assert!(summary.contains("[note]"));
    }

    #[test]
    fn strict_reads_surface_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path());
        let mut pool = LocalPool::new();

        let summary = resolve(&mut pool, tmp.path(), "missing.md", false).unwrap();
        assert!(summary.contains("<empty>"));
        assert!(resolve(&mut pool, tmp.path(), "missing.md", true).is_err());
    }

    #[test]
    fn config_file_sets_read_policy() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path());
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"{ "read_failure_policy": "propagate" }"#,
        )
        .unwrap();
        let mut pool = LocalPool::new();
        assert!(resolve(&mut pool, tmp.path(), "missing.md", false).is_err());
    }

    #[test]
    fn references_and_bundles() {
        let tmp = tempfile::tempdir().unwrap();
        let (doc, note) = write_project(tmp.path());
        let mut pool = LocalPool::new();

        assert_eq!(references(&mut pool, tmp.path(), "guide.doc").unwrap(), vec![note]);
        assert_eq!(
            bundle(&mut pool, tmp.path(), &note.to_string()).unwrap(),
            b"ship it".to_vec()
        );
        assert!(bundle(&mut pool, tmp.path(), &doc.to_string()).is_err());
    }
}
