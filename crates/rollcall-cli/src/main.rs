use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceService, AttendanceSheet, EncodingStore, GroupId, Image, PersonId, RosterProvider,
    StoreRoster,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod pool;
mod roster;
mod sidecar;
mod training;

use config::Config;
use pool::PoolSettings;
use sidecar::SidecarExtractor;
use training::ProcessedLedger;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold new reference images into the stored encodings
    Encode {
        #[arg(short, long)]
        group: String,
        /// Overrides the configured training directory
        #[arg(long)]
        training_dir: Option<PathBuf>,
        /// Re-process images already recorded as processed
        #[arg(long)]
        all: bool,
    },
    /// Take attendance from one or more group photos
    Attend {
        #[arg(short, long)]
        group: String,
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// List persons with stored encodings
    Persons {
        #[arg(short, long)]
        group: String,
    },
    /// Delete a person's stored encodings
    Reset {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        person: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let store = config.open_store().context("opening encoding store")?;

    match cli.command {
        Commands::Encode {
            group,
            training_dir,
            all,
        } => {
            let training_dir = training_dir.unwrap_or_else(|| config.training_dir.clone());
            encode(&config, store, GroupId::from(group), training_dir, all).await?;
        }
        Commands::Attend { group, photos } => {
            let group = GroupId::from(group);
            let roster_path = config.roster_path.clone();
            let tolerance = config.thresholds.match_tolerance;
            let sheet = tokio::task::spawn_blocking(move || {
                attend(store.as_ref(), roster_path, tolerance, &group, &photos)
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&render_sheet(&sheet))?);
        }
        Commands::Persons { group } => {
            for person in store.list_persons(&GroupId::from(group))? {
                println!("{person}");
            }
        }
        Commands::Reset { group, person } => {
            let (group, person) = (GroupId::from(group), PersonId::from(person));
            if store.reset(&group, &person)? {
                tracing::info!(%group, %person, "encodings reset");
                println!("reset {group}/{person}");
            } else {
                println!("no encodings stored for {group}/{person}");
            }
        }
    }

    Ok(())
}

async fn encode(
    config: &Config,
    store: Arc<dyn EncodingStore>,
    group: GroupId,
    training_dir: PathBuf,
    all: bool,
) -> Result<()> {
    let mut ledger = ProcessedLedger::load(&training_dir, &group)?;
    let jobs: Vec<(PersonId, Vec<Image>)> = training::scan(&training_dir, &group)?
        .into_iter()
        .map(|(person, images)| {
            let fresh = images
                .into_iter()
                .filter(|image| all || !ledger.contains(&image.id))
                .collect::<Vec<_>>();
            (person, fresh)
        })
        .filter(|(_, images)| !images.is_empty())
        .collect();
    tracing::info!(%group, persons = jobs.len(), already_processed = ledger.len(), "scanned training images");

    let settings = PoolSettings {
        dedup_threshold: config.thresholds.dedup_threshold,
        workers: config.build_workers,
        max_attempts: config.conflict_retries,
    };
    let report = pool::build_all(store, Arc::new(SidecarExtractor), group, jobs, settings).await;

    ledger.extend(
        report
            .succeeded
            .iter()
            .flat_map(|outcome| outcome.processed.iter().cloned()),
    );
    ledger.save()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failed.is_empty() {
        bail!("{} person(s) failed to encode", report.failed.len());
    }
    Ok(())
}

fn attend(
    store: &dyn EncodingStore,
    roster_path: Option<PathBuf>,
    match_tolerance: f32,
    group: &GroupId,
    photos: &[PathBuf],
) -> Result<AttendanceSheet> {
    let roster: Box<dyn RosterProvider + '_> = match roster_path {
        Some(path) => Box::new(roster::load_roster(&path)?),
        None => Box::new(StoreRoster::new(store)),
    };
    let photos: Vec<Image> = photos
        .iter()
        .map(|path| Image::new(path.display().to_string(), path.clone()))
        .collect();

    let service = AttendanceService::new(store, &SidecarExtractor, roster.as_ref(), match_tolerance);
    match service.take_attendance(group, &photos) {
        Ok(sheet) => Ok(sheet),
        Err(e) if e.is_unclear_image() => bail!("{e}; please provide a clearer photo"),
        Err(e) => Err(e.into()),
    }
}

fn render_sheet(sheet: &AttendanceSheet) -> serde_json::Value {
    let students: Vec<serde_json::Value> = sheet
        .outcomes
        .iter()
        .map(|o| serde_json::json!({ "id": o.person_id, "status": o.status() }))
        .collect();
    serde_json::json!({
        "group": sheet.group_id,
        "taken_at": sheet.taken_at.to_rfc3339(),
        "students": students,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Embedding, MemoryEncodingStore, PersonEncodingSet};
    use std::path::Path;

    fn photo(dir: &Path, name: &str, faces: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"jpeg").unwrap();
        std::fs::write(sidecar::sidecar_path(&path), faces).unwrap();
        path
    }

    fn enrolled_store() -> MemoryEncodingStore {
        let store = MemoryEncodingStore::new();
        for (person, value) in [("s1", 0.0), ("s2", 5.0)] {
            let mut set = PersonEncodingSet::empty("g".into(), person.into());
            set.embeddings.push(Embedding::new(vec![value, value]));
            store.save(&set).unwrap();
        }
        store
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        assert!(Cli::try_parse_from(["rollcall", "attend", "--group", "g"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "encode", "-g", "g", "--all"]).is_ok());
    }

    #[test]
    fn test_attend_with_roster_file() {
        let dir = tempfile::tempdir().unwrap();
        let roster = dir.path().join("roster.toml");
        std::fs::write(&roster, "[groups]\ng = [\"s3\", \"s2\", \"s1\"]").unwrap();
        let photos = vec![photo(dir.path(), "class.jpg", "[[0.1, 0.1]]")];

        let sheet = attend(&enrolled_store(), Some(roster), 0.6, &"g".into(), &photos).unwrap();
        let rendered = render_sheet(&sheet);
        assert_eq!(rendered["group"], "g");
        assert_eq!(
            rendered["students"],
            serde_json::json!([
                { "id": "s3", "status": "absent" },
                { "id": "s2", "status": "absent" },
                { "id": "s1", "status": "present" },
            ])
        );
    }

    #[test]
    fn test_attend_falls_back_to_enrolled_persons() {
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![photo(dir.path(), "class.jpg", "[[5.0, 5.0], [9.0, 9.0]]")];
        let sheet = attend(&enrolled_store(), None, 0.6, &"g".into(), &photos).unwrap();
        let present: Vec<&str> = sheet.present().map(|p| p.as_str()).collect();
        let absent: Vec<&str> = sheet.absent().map(|p| p.as_str()).collect();
        assert_eq!(present, vec!["s2"]);
        assert_eq!(absent, vec!["s1"]);
    }

    #[test]
    fn test_attend_unclear_photo_asks_for_clearer_one() {
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![photo(dir.path(), "blurry.jpg", "[]")];
        let err = attend(&enrolled_store(), None, 0.6, &"g".into(), &photos).unwrap_err();
        assert!(err.to_string().contains("clearer photo"));
    }

    #[tokio::test]
    async fn test_encode_updates_ledger_and_skips_processed() {
        let dir = tempfile::tempdir().unwrap();
        let person_dir = dir.path().join("g/s1");
        std::fs::create_dir_all(&person_dir).unwrap();
        photo(&person_dir, "a.jpg", "[[0.0, 0.0]]");
        photo(&person_dir, "b.jpg", "[]");

        let config = Config::load_defaults_for_test(dir.path());
        let store: Arc<dyn EncodingStore> = Arc::new(MemoryEncodingStore::new());
        encode(&config, store.clone(), "g".into(), dir.path().to_path_buf(), false)
            .await
            .unwrap();

        let ledger = ProcessedLedger::load(dir.path(), &"g".into()).unwrap();
        assert!(ledger.contains(&"s1/a.jpg".into()));
        assert!(!ledger.contains(&"s1/b.jpg".into()));
        assert_eq!(store.load(&"g".into(), &"s1".into()).unwrap().revision, 1);

        photo(&person_dir, "c.jpg", "[[3.0, 3.0]]");
        encode(&config, store.clone(), "g".into(), dir.path().to_path_buf(), false)
            .await
            .unwrap();
        let set = store.load(&"g".into(), &"s1".into()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.revision, 2);
    }
}
