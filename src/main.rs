use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;

mod cancel;
mod cli;
mod config;
mod lock;
mod matcher;
mod project;
mod rank;
mod roundtrip;
mod segment;
mod semantic;
mod service;
mod tm;
mod tmx;

use cancel::CancelToken;
use config::Config;
use lock::FileLock;
use project::Project;
use roundtrip::{export_units, reimport_units, ExternalFormat, PlaceholderMap, TabularBilingual};
use segment::SegText;
use semantic::{ReconcileReport, SemanticService};
use service::{AttachedStore, QueryService};
use tm::{BackendCsv, DuplicatePolicy, LanguagePair, TmEntryCreate, TmStore};

fn parse_pair(raw: &str) -> anyhow::Result<LanguagePair> {
    match raw.split_once(':') {
        Some((source, target)) if !source.is_empty() && !target.is_empty() => {
            Ok(LanguagePair::new(source, target))
        }
        _ => bail!("language pair must look like \"en:fr\", got \"{raw}\""),
    }
}

fn open_engine(dir: &Path) -> anyhow::Result<(Config, BackendCsv, SemanticService)> {
    let config = Config::load_with(dir);
    let store = BackendCsv::open(dir, config.tm.on_duplicate)?;
    let semantic = SemanticService::new(config.semantic.clone(), dir.to_path_buf());
    Ok((config, store, semantic))
}

fn lock_store(dir: &Path) -> anyhow::Result<FileLock> {
    std::fs::create_dir_all(dir)?;
    FileLock::try_acquire(dir).context("cannot lock the store for writing")
}

fn load_project(path: &Path) -> anyhow::Result<Project> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read project {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("{} is not a valid project file", path.display()))
}

fn save_project(path: &Path, project: &Project) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(project)?)?;
    Ok(())
}

/// The sidecar file keeping an export's placeholder numbering until the
/// matching reimport.
fn session_path(document: &Path) -> PathBuf {
    let mut name = document.as_os_str().to_owned();
    name.push(".session.json");
    PathBuf::from(name)
}

fn reconcile_with_progress(
    store: &dyn TmStore,
    semantic: &SemanticService,
    force: bool,
) -> anyhow::Result<ReconcileReport> {
    let entries: Vec<(u64, SegText)> = store
        .snapshot()
        .into_iter()
        .map(|entry| (entry.id, entry.source))
        .collect();

    let bar = ProgressBar::new(entries.len() as u64);
    let report = semantic.reconcile(&entries, force, |done, _total| {
        bar.set_position(done as u64);
    })?;
    bar.finish_and_clear();
    Ok(report)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let dir = args.dir;

    match args.command {
        cli::Command::Query {
            text,
            pair,
            reference,
        } => {
            let pair = parse_pair(&pair)?;
            let (config, store, semantic) = open_engine(&dir)?;

            let references: Vec<BackendCsv> = reference
                .iter()
                .map(|path| BackendCsv::open(path, DuplicatePolicy::Reject))
                .collect::<Result<_, _>>()?;

            let mut attached = vec![AttachedStore::read_only(&store, Some(&semantic))];
            for store in &references {
                attached.push(AttachedStore::read_only(store, None));
            }

            let cancel = CancelToken::new();
            {
                let cancel = cancel.clone();
                if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
                    log::debug!("ctrl-c handler not installed: {err}");
                }
            }

            let suggestions = QueryService::new(&config)
                .suggest(&SegText::from_text(text), &pair, &attached, &cancel)
                .map_err(|_| anyhow::anyhow!("query cancelled"))?;

            if suggestions.semantic_stale {
                log::warn!("semantic index still catching up, results may lag");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&suggestions.candidates).unwrap()
            );
            Ok(())
        }

        cli::Command::Insert {
            source,
            target,
            pair,
            provenance,
        } => {
            let pair = parse_pair(&pair)?;
            let _lock = lock_store(&dir)?;
            let (_config, store, semantic) = open_engine(&dir)?;

            let entry = store.insert(TmEntryCreate {
                pair,
                source: SegText::from_text(source),
                target: SegText::from_text(target),
                provenance,
                created_at: None,
            })?;

            if let Err(err) = semantic.enqueue_upsert(entry.id, &entry.source) {
                log::warn!("semantic index update not queued: {err}");
            }

            println!("{}", serde_json::to_string_pretty(&entry).unwrap());
            Ok(())
        }

        cli::Command::Delete { id } => {
            let _lock = lock_store(&dir)?;
            let (_config, store, semantic) = open_engine(&dir)?;

            store.delete(id)?;
            if let Err(err) = semantic.enqueue_remove(id) {
                log::warn!("semantic index eviction not queued: {err}");
            }

            println!("entry {id} deleted");
            Ok(())
        }

        cli::Command::ImportTmx { file, pair } => {
            let pair = parse_pair(&pair)?;
            let _lock = lock_store(&dir)?;
            let (_config, store, semantic) = open_engine(&dir)?;

            let input =
                File::open(&file).with_context(|| format!("cannot open {}", file.display()))?;
            let report = tmx::import_tmx(&store, &pair, BufReader::new(input))?;
            println!(
                "{} entries imported, {} skipped",
                report.imported, report.skipped
            );

            if semantic.is_enabled() {
                let report = reconcile_with_progress(&store, &semantic, false)?;
                println!(
                    "{} sources embedded, {} skipped, {} evicted",
                    report.embedded, report.skipped, report.removed
                );
            }
            Ok(())
        }

        cli::Command::ExportTmx { file, pair } => {
            let pair = parse_pair(&pair)?;
            let (_config, store, _semantic) = open_engine(&dir)?;

            let entries = store.all(&pair);
            let mut out = BufWriter::new(
                File::create(&file).with_context(|| format!("cannot create {}", file.display()))?,
            );
            tmx::export_tmx(&entries, &pair.source_lang, &mut out)?;
            out.flush()?;

            println!("{} entries exported to {}", entries.len(), file.display());
            Ok(())
        }

        cli::Command::Reindex { force } => {
            let _lock = lock_store(&dir)?;
            let (_config, store, semantic) = open_engine(&dir)?;
            if !semantic.is_enabled() {
                bail!("semantic retrieval is disabled in config.yaml");
            }

            let report = reconcile_with_progress(&store, &semantic, force)?;
            println!(
                "{} sources embedded, {} skipped, {} evicted",
                report.embedded, report.skipped, report.removed
            );
            Ok(())
        }

        cli::Command::ProjectNew { file, name, pair } => {
            let pair = parse_pair(&pair)?;
            if file.exists() {
                bail!("{} already exists", file.display());
            }

            let name = name.unwrap_or_else(|| {
                file.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "project".to_string())
            });
            let project = Project::new(name, pair);
            save_project(&file, &project)?;

            println!("created {}", file.display());
            Ok(())
        }

        cli::Command::ProjectAdd { file, text } => {
            let mut project = load_project(&file)?;
            let id = project.add_segment(SegText::from_text(text));
            save_project(&file, &project)?;

            println!("segment {id} added");
            Ok(())
        }

        cli::Command::ExportBilingual { project, out } => {
            let project_data = load_project(&project)?;

            let mut map = PlaceholderMap::new();
            let units = export_units(project_data.segments(), &mut map);

            let format = TabularBilingual;
            let mut doc = BufWriter::new(
                File::create(&out).with_context(|| format!("cannot create {}", out.display()))?,
            );
            format.write_document(&units, &mut doc)?;
            doc.flush()?;

            let session = session_path(&out);
            map.save(&session)?;

            println!(
                "{} units exported to {} (session: {})",
                units.len(),
                out.display(),
                session.display()
            );
            Ok(())
        }

        cli::Command::ImportBilingual { project, input } => {
            let mut project_data = load_project(&project)?;

            let session = session_path(&input);
            let map = PlaceholderMap::load(&session)
                .with_context(|| format!("cannot load session {}", session.display()))?;

            let format = TabularBilingual;
            let mut doc = BufReader::new(
                File::open(&input).with_context(|| format!("cannot open {}", input.display()))?,
            );
            let units = format.read_document(&mut doc)?;

            let report = reimport_units(project_data.segments_mut(), &units, &map);
            save_project(&project, &project_data)?;

            println!("{}", serde_json::to_string_pretty(&report).unwrap());
            if !report.is_clean() {
                log::warn!("{} issues need review", report.issues.len());
            }
            Ok(())
        }

        cli::Command::Stats {} => {
            let (config, store, semantic) = open_engine(&dir)?;

            println!(
                "store: {} entries in {}",
                store.len(),
                dir.join("tm.csv").display()
            );

            if semantic.is_enabled() {
                let vectors = dir.join("vectors.bin");
                match std::fs::metadata(&vectors) {
                    Ok(meta) => println!(
                        "semantic index: {} bytes in {} (model {})",
                        meta.len(),
                        vectors.display(),
                        config.semantic.model
                    ),
                    Err(_) => println!(
                        "semantic index: not built yet (model {})",
                        config.semantic.model
                    ),
                }
            } else {
                println!("semantic retrieval: disabled");
            }
            Ok(())
        }
    }
}
