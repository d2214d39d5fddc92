//! Database backup and restore around the MongoDB dump tools.
//!
//! `mongodump` and `mongorestore` do the actual data movement; this module
//! locates them, builds their argument lists, and handles the shapes a backup
//! actually arrives in: a dump folder, the `DigisatServer` subfolder picked by
//! mistake, a flat folder of `.bson` files, a gzip-compressed dump, or a zip
//! archive of any of those.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::{DbSettings, DATABASE_NAME};
use crate::ops::{note_cancelled, OpContext, OpOutcome};
use crate::platform::PlatformOps;
use crate::state::OperationKind;
use crate::{AppError, AppResult};

pub const TOOL_NOT_FOUND_CODE: &str = "BACKUP/TOOL_NOT_FOUND";
pub const TOOL_FAILED_CODE: &str = "BACKUP/TOOL_FAILED";
pub const PATH_NOT_FOUND_CODE: &str = "BACKUP/PATH_NOT_FOUND";
pub const BAD_ARCHIVE_CODE: &str = "BACKUP/BAD_ARCHIVE";

/// Directories the database tools are commonly installed in, checked after
/// `DIGIMAINT_MONGO_TOOLS` and the `PATH`.
const TOOL_DIRS: &[&str] = &[
    r"C:\DigiSat\SuiteG6\MongoDB\bin",
    r"C:\Digisat\MongoDB\bin",
    r"C:\Digisat\Server\MongoDB\bin",
    r"C:\Program Files\Digisat\MongoDB\bin",
    r"C:\Program Files\MongoDB\Server\7.0\bin",
    r"C:\Program Files\MongoDB\Server\6.0\bin",
    r"C:\Program Files\MongoDB\Server\5.0\bin",
    r"C:\Program Files\MongoDB\Server\4.4\bin",
    r"C:\Program Files\MongoDB\Tools\100\bin",
    r"C:\mongodb\bin",
];

/// Locating and running the dump tools, kept behind a trait so the backup and
/// restore sequences run against a recording fake in tests.
pub trait MongoTools: Send + Sync {
    fn locate(&self, tool: &str) -> Option<PathBuf>;
    /// Run the tool to completion, returning its combined output on success.
    fn run(&self, program: &Path, args: &[String]) -> AppResult<String>;
}

/// Real implementation: search the usual install locations, then run the tool
/// as a child process.
#[derive(Debug, Default)]
pub struct SystemMongoTools;

impl SystemMongoTools {
    pub fn new() -> Self {
        SystemMongoTools
    }
}

impl MongoTools for SystemMongoTools {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        let exe = format!("{tool}.exe");

        if let Ok(dir) = std::env::var("DIGIMAINT_MONGO_TOOLS") {
            let candidate = Path::new(&dir).join(&exe);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if let Some(path) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path) {
                let candidate = dir.join(&exe);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        TOOL_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(&exe))
            .find(|candidate| candidate.is_file())
    }

    fn run(&self, program: &Path, args: &[String]) -> AppResult<String> {
        let output = std::process::Command::new(program)
            .args(args)
            .output()
            .map_err(|err| {
                AppError::new(
                    TOOL_FAILED_CODE,
                    format!("could not run {}: {err}", program.display()),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(AppError::new(
                TOOL_FAILED_CODE,
                format!("{} exited with {}", program.display(), output.status),
            )
            .with_context("output", format!("{stdout}{stderr}")));
        }
        Ok(format!("{stdout}{stderr}"))
    }
}

/// One backup on disk: a `backup_<timestamp>` folder and its total size.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub timestamp: String,
}

/// Dump the database into a timestamped folder under `output_dir`.
pub fn backup_database(
    ctx: &OpContext,
    tools: &dyn MongoTools,
    settings: &DbSettings,
    output_dir: &Path,
) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::BackupDatabase);

    if ctx.should_stop() {
        note_cancelled(ctx, &mut outcome);
        return Ok(outcome.finish(started));
    }

    let Some(mongodump) = tools.locate("mongodump") else {
        return Err(AppError::new(
            TOOL_NOT_FOUND_CODE,
            "mongodump was not found. Install the MongoDB database tools or set DIGIMAINT_MONGO_TOOLS.",
        ));
    };

    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let target = output_dir.join(format!("backup_{timestamp}"));
    std::fs::create_dir_all(&target)?;

    ctx.progress(format!(
        "Dumping {DATABASE_NAME} to {}...",
        target.display()
    ));
    let output = tools.run(&mongodump, &dump_args(settings, &target))?;
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        ctx.progress(line.to_string());
    }

    outcome.matched = 1;
    outcome.modified = 1;
    let size = dir_size(&target);
    ctx.progress(format!(
        "Backup finished: {} ({:.2} MB).",
        target.display(),
        size as f64 / 1024.0 / 1024.0
    ));
    Ok(outcome.finish(started))
}

pub(crate) fn dump_args(settings: &DbSettings, target: &Path) -> Vec<String> {
    vec![
        format!("--host={}:{}", settings.host, settings.port),
        format!("--username={}", settings.user),
        format!("--password={}", settings.password),
        "--authenticationDatabase=admin".to_string(),
        format!("--db={DATABASE_NAME}"),
        format!("--out={}", target.display()),
    ]
}

/// Restore a dump folder or zip archive into the database, then start the
/// suite services back up.
pub fn restore_database(
    ctx: &OpContext,
    tools: &dyn MongoTools,
    platform: &dyn PlatformOps,
    settings: &DbSettings,
    backup_path: &Path,
    drop_existing: bool,
) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::RestoreDatabase);

    if ctx.should_stop() {
        note_cancelled(ctx, &mut outcome);
        return Ok(outcome.finish(started));
    }

    let Some(mongorestore) = tools.locate("mongorestore") else {
        return Err(AppError::new(
            TOOL_NOT_FOUND_CODE,
            "mongorestore was not found. Install the MongoDB database tools or set DIGIMAINT_MONGO_TOOLS.",
        ));
    };

    // Keeps the extracted archive alive until mongorestore has read it.
    let mut extracted: Option<tempfile::TempDir> = None;
    let source = if is_zip(backup_path) {
        ctx.progress(format!("Extracting archive {}...", backup_path.display()));
        let dir = tempfile::tempdir()?;
        extract_zip(backup_path, dir.path())?;
        let root = dir.path().to_path_buf();
        extracted = Some(dir);
        root
    } else {
        backup_path.to_path_buf()
    };

    let plan = plan_restore(&source)?;
    if plan.use_gzip {
        ctx.progress("Compressed dump detected; restoring with gzip decompression.");
    }
    if drop_existing {
        ctx.warn("Existing collections will be dropped and recreated.");
    }

    ctx.progress(format!("Restoring from {}...", plan.root.display()));
    let output = tools.run(&mongorestore, &restore_args(settings, &plan, drop_existing))?;
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        ctx.progress(line.to_string());
    }
    drop(extracted);

    outcome.matched = 1;
    outcome.modified = 1;
    ctx.progress("Restore finished. Starting suite services...");
    let services = super::environment::start_services(ctx, platform);
    outcome.failed_steps += services.failed_steps;

    Ok(outcome.finish(started))
}

/// How `mongorestore` should be pointed at a dump folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RestorePlan {
    pub root: PathBuf,
    pub use_gzip: bool,
    /// True when the dump has no per-database subfolder, so the target
    /// database has to be named explicitly.
    pub explicit_db: bool,
}

/// Work out the folder shape: a proper dump with a `DigisatServer` subfolder,
/// the subfolder itself handed over directly, or a flat folder of `.bson`
/// files.
pub(crate) fn plan_restore(path: &Path) -> AppResult<RestorePlan> {
    if !path.is_dir() {
        return Err(AppError::new(
            PATH_NOT_FOUND_CODE,
            format!("backup path not found: {}", path.display()),
        ));
    }

    let use_gzip = WalkDir::new(path)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.ends_with(".bson.gz") || name.ends_with(".metadata.json.gz")
        });

    if path.join(DATABASE_NAME).is_dir() {
        return Ok(RestorePlan {
            root: path.to_path_buf(),
            use_gzip,
            explicit_db: false,
        });
    }
    if path.file_name().map(|name| name == DATABASE_NAME).unwrap_or(false) {
        let root = path.parent().unwrap_or(path).to_path_buf();
        return Ok(RestorePlan {
            root,
            use_gzip,
            explicit_db: false,
        });
    }
    Ok(RestorePlan {
        root: path.to_path_buf(),
        use_gzip,
        explicit_db: true,
    })
}

pub(crate) fn restore_args(
    settings: &DbSettings,
    plan: &RestorePlan,
    drop_existing: bool,
) -> Vec<String> {
    let mut args = vec![
        format!("--host={}:{}", settings.host, settings.port),
        format!("--username={}", settings.user),
        format!("--password={}", settings.password),
        "--authenticationDatabase=admin".to_string(),
        "--verbose".to_string(),
    ];
    if plan.use_gzip {
        args.push("--gzip".to_string());
    }
    if drop_existing {
        args.push("--drop".to_string());
    }
    if plan.explicit_db {
        args.push(format!("--db={DATABASE_NAME}"));
    }
    args.push(plan.root.display().to_string());
    args
}

/// Backups found under `dir`, oldest first.
pub fn list_backups(dir: &Path) -> AppResult<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(timestamp) = name.strip_prefix("backup_") else {
            continue;
        };
        if timestamp.is_empty() {
            continue;
        }
        let path = entry.path();
        entries.push(BackupEntry {
            size_bytes: dir_size(&path),
            path,
            timestamp: timestamp.to_string(),
        });
    }
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(entries)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn archive_err(err: zip::result::ZipError) -> AppError {
    AppError::new(BAD_ARCHIVE_CODE, err.to_string())
}

pub(crate) fn extract_zip(archive: &Path, dest: &Path) -> AppResult<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(archive_err)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(archive_err)?;
        // enclosed_name rejects entries that would escape the destination.
        let Some(relative) = entry.enclosed_name() else {
            return Err(AppError::new(
                BAD_ARCHIVE_CODE,
                format!("unsafe path in archive: {}", entry.name()),
            ));
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}
