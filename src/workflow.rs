use crate::agents::{
    EntryLoaderAgent, EntryOutcome, FileVersionEntry, PatchResult, SkipReason, VersionPatcher,
};
use crate::error::{MsiverError, Result};
use crate::installer::{FileVersionRow, MsiDatabase, OpenMode};
use crate::utils::path_validator::PathValidator;
use crate::utils::pattern::PatternMatcher;
use crate::utils::verbose;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use jiff::Timestamp;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything `patch` needs besides the package path.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub pairs: Vec<String>,
    pub manifests: Vec<PathBuf>,
    pub item_type: String,
    pub properties: Vec<String>,
    pub dry_run: bool,
    pub strict: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct PatchReport<'a> {
    msi: String,
    generated_at: Timestamp,
    dry_run: bool,
    committed: bool,
    #[serde(flatten)]
    result: &'a PatchResult,
}

/// Execute the patch workflow: load entries, apply them in one transaction
/// and commit once.
pub fn execute_patch(msi_path: &Path, options: &PatchOptions) -> Result<PatchResult> {
    if msi_path.as_os_str().is_empty() {
        return Err(MsiverError::InvalidInput(
            "MSI file path was not provided".to_string(),
        ));
    }

    let entries = load_entries(options)?;
    if entries.is_empty() {
        let result = PatchResult::default();
        if options.json {
            print_report(msi_path, options, false, &result)?;
        } else {
            println!("{}", "⚠ No files specified for version change.".yellow());
        }
        return Ok(result);
    }

    let msi_path = PathValidator::validate_database_path(msi_path)?;
    if !options.json {
        println!(
            "{}",
            format!("Updating file version in MSI: {}", msi_path.display())
                .cyan()
                .bold()
        );
    }

    let mut database = MsiDatabase::open(&msi_path, OpenMode::Transact).map_err(patch_failed)?;
    let result = apply_entries(&mut database, &entries, options.json).map_err(patch_failed)?;

    if options.strict && result.has_skips() {
        return Err(MsiverError::InvalidInput(format!(
            "{} of {} entries were skipped in strict mode; nothing was committed",
            result.skipped.len(),
            entries.len()
        )));
    }

    let committed = if options.dry_run {
        if verbose() {
            eprintln!(
                "[VERBOSE] Dry run, discarding changes to {}",
                database.path().display()
            );
        }
        false
    } else {
        database.commit().map_err(patch_failed)?;
        true
    };

    if options.json {
        print_report(&msi_path, options, committed, &result)?;
    } else {
        print_summary(&result, committed);
    }

    Ok(result)
}

fn patch_failed(err: MsiverError) -> MsiverError {
    MsiverError::PatchFailed(Box::new(err))
}

fn load_entries(options: &PatchOptions) -> Result<Vec<FileVersionEntry>> {
    let loader =
        EntryLoaderAgent::new(options.item_type.as_str()).with_properties(&options.properties)?;

    let mut entries = loader.parse_pairs(&options.pairs)?;
    for manifest in &options.manifests {
        let manifest = PathValidator::validate_manifest_path(manifest)?;
        entries.extend(loader.load_manifest(&manifest)?);
    }
    Ok(entries)
}

fn apply_entries(
    database: &mut MsiDatabase,
    entries: &[FileVersionEntry],
    quiet: bool,
) -> Result<PatchResult> {
    let pb = ProgressBar::new(entries.len() as u64);
    if quiet {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    if let Ok(style) = ProgressStyle::with_template("  [{bar:40}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }

    let result = VersionPatcher::patch_with(database, entries, |entry, outcome| {
        pb.set_message(entry.file_name.clone());
        if !quiet {
            pb.suspend(|| print_outcome(entry, outcome));
        }
        pb.inc(1);
    });

    pb.finish_and_clear();
    result
}

fn print_outcome(entry: &FileVersionEntry, outcome: &EntryOutcome) {
    if verbose() {
        eprintln!(
            "[VERBOSE] Setting version {} for the file {}",
            entry.version.as_deref().unwrap_or_default(),
            entry.file_name
        );
    }

    match outcome {
        EntryOutcome::Updated => println!(
            "   {}",
            format!(
                "✓ Updated {} to version {}",
                entry.file_name,
                entry.version.as_deref().unwrap_or_default()
            )
            .green()
        ),
        EntryOutcome::Skipped(SkipReason::NoVersion) => println!(
            "   {}",
            format!("⚠ No version specified for the file: {}", entry.file_name).yellow()
        ),
        EntryOutcome::Skipped(SkipReason::NotFound) => println!(
            "   {}",
            format!("⚠ File not found in MSI File table: {}", entry.file_name).yellow()
        ),
        EntryOutcome::Skipped(SkipReason::UpdateFailed(message)) => println!(
            "   {}",
            format!(
                "⚠ Error updating file version for {}: {}",
                entry.file_name, message
            )
            .yellow()
        ),
    }
}

fn print_summary(result: &PatchResult, committed: bool) {
    println!(
        "\n{} updated, {} not found, {} without version, {} failed",
        result.updated_count.to_string().green().bold(),
        result.not_found_count(),
        result.no_version_count(),
        result.failed_count()
    );
    if result.has_skips() {
        let names: Vec<&str> = result.skipped_names().into_iter().collect();
        println!("   Skipped: {}", names.join(", ").dimmed());
    }

    if committed {
        println!(
            "{}",
            "✨ File version update completed successfully.".green().bold()
        );
    } else {
        println!("{}", "Dry run: no changes were written.".yellow());
    }
}

fn print_report(
    msi_path: &Path,
    options: &PatchOptions,
    committed: bool,
    result: &PatchResult,
) -> Result<()> {
    let report = PatchReport {
        msi: msi_path.display().to_string(),
        generated_at: Timestamp::now(),
        dry_run: options.dry_run,
        committed,
        result,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// List the File table of a package.
pub fn execute_list(msi_path: &Path, filter: Option<&str>, json: bool) -> Result<()> {
    let rows = read_file_table(msi_path, filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{}", "No matching files in the File table.".yellow());
        return Ok(());
    }

    let width = rows.iter().map(|r| r.file.len()).max().unwrap_or(0);
    println!("{}", "File table:".cyan().bold());
    for row in &rows {
        let version = match &row.version {
            Some(v) => v.green().to_string(),
            None => "(none)".dimmed().to_string(),
        };
        println!("  {:<width$}  {}", row.file, version, width = width);
    }
    println!("\n{} files", rows.len());

    Ok(())
}

fn read_file_table(msi_path: &Path, filter: Option<&str>) -> Result<Vec<FileVersionRow>> {
    let matcher = filter.map(PatternMatcher::new).transpose()?;
    let msi_path = PathValidator::validate_database_path(msi_path)?;
    let mut database = MsiDatabase::open(&msi_path, OpenMode::ReadOnly)?;

    let mut rows = database.file_versions()?;
    if let Some(matcher) = matcher {
        rows.retain(|row| matcher.matches(&row.file));
    }
    Ok(rows)
}
