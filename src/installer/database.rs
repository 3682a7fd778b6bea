use super::{FILE_KEY_COLUMN, FILE_TABLE, FileTableStore, VERSION_COLUMN};
use crate::error::{MsiverError, Result, StatementError};
use crate::utils::verbose;
use msi::{Expr, Package, Select, Update, Value};
use serde::Serialize;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

/// How an installer database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only; `commit` is rejected.
    ReadOnly,
    /// Buffers every change in memory until `commit`.
    Transact,
}

/// One row of the file table as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVersionRow {
    pub file: String,
    pub version: Option<String>,
}

type MsiPackage = Package<Cursor<Vec<u8>>>;

const VALIDATION_TABLE: &str = "_Validation";
/// Category that accepts any string.
const RELAXED_CATEGORY: &str = "Text";

/// An exclusively owned handle to an installer database on disk.
///
/// The whole package is loaded into memory when opened, so edits never reach
/// the file until [`MsiDatabase::commit`] is called. Dropping the handle
/// without committing discards them.
///
/// Versions are opaque strings, so a transactional handle lowers the
/// `_Validation` category of `File.Version` to `Text` while it is open and
/// puts the declared category back on commit.
pub struct MsiDatabase {
    path: PathBuf,
    mode: OpenMode,
    package: MsiPackage,
    relaxed_category: Option<String>,
}

impl MsiDatabase {
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(MsiverError::Database(
                "MSI file path was not provided".to_string(),
            ));
        }

        let bytes = fs::read(path).map_err(|e| {
            MsiverError::Database(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        if verbose() {
            eprintln!(
                "[VERBOSE] Opening {} ({} bytes, {:?})",
                path.display(),
                bytes.len(),
                mode
            );
        }

        let package = Package::open(Cursor::new(bytes)).map_err(|e| {
            MsiverError::Database(format!(
                "'{}' is not a valid MSI package: {}",
                path.display(),
                e
            ))
        })?;

        let (package, relaxed_category) = match mode {
            OpenMode::ReadOnly => (package, None),
            OpenMode::Transact => relax_version_category(package).map_err(|e| {
                MsiverError::Database(format!(
                    "Failed to prepare '{}' for version updates: {}",
                    path.display(),
                    e
                ))
            })?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            package,
            relaxed_category,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every (File, Version) pair of the file table, in table order.
    pub fn file_versions(&mut self) -> Result<Vec<FileVersionRow>> {
        self.ensure_file_table()?;

        let query = Select::table(FILE_TABLE).columns(&[FILE_KEY_COLUMN, VERSION_COLUMN]);
        let rows = self
            .package
            .select_rows(query)
            .map_err(|e| MsiverError::Database(format!("Failed to read File table: {}", e)))?;

        Ok(rows
            .map(|row| FileVersionRow {
                file: row[FILE_KEY_COLUMN].as_str().unwrap_or_default().to_string(),
                version: row[VERSION_COLUMN].as_str().map(str::to_string),
            })
            .collect())
    }

    /// Look up the version of a single file (exact key match).
    pub fn file_version(&mut self, file_name: &str) -> Result<Option<String>> {
        Ok(self
            .file_versions()?
            .into_iter()
            .find(|row| row.file == file_name)
            .and_then(|row| row.version))
    }

    /// Write the buffered package back to disk, replacing the original file.
    pub fn commit(mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(MsiverError::Database(format!(
                "'{}' was opened read-only and cannot be committed",
                self.path.display()
            )));
        }

        if let Some(category) = &self.relaxed_category {
            set_version_category(&mut self.package, category).map_err(|e| {
                MsiverError::Database(format!("Failed to restore Version validation: {}", e))
            })?;
        }

        let bytes = self
            .package
            .into_inner()
            .map_err(|e| MsiverError::Database(format!("Failed to flush package: {}", e)))?
            .into_inner();

        let staging = staging_path(&self.path);
        fs::write(&staging, &bytes).map_err(|e| {
            MsiverError::Database(format!("Failed to write '{}': {}", staging.display(), e))
        })?;
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(MsiverError::Database(format!(
                "Failed to replace '{}': {}",
                self.path.display(),
                e
            )));
        }

        if verbose() {
            eprintln!(
                "[VERBOSE] Committed {} bytes to {}",
                bytes.len(),
                self.path.display()
            );
        }

        Ok(())
    }

    fn ensure_file_table(&self) -> Result<()> {
        let table = self.package.get_table(FILE_TABLE).ok_or_else(|| {
            MsiverError::OperationAborted(format!(
                "'{}' has no {} table",
                self.path.display(),
                FILE_TABLE
            ))
        })?;

        for column in [FILE_KEY_COLUMN, VERSION_COLUMN] {
            if !table.columns().iter().any(|c| c.name() == column) {
                return Err(MsiverError::OperationAborted(format!(
                    "{} table has no `{}` column",
                    FILE_TABLE, column
                )));
            }
        }

        Ok(())
    }
}

impl FileTableStore for MsiDatabase {
    fn prepare_version_update(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(MsiverError::OperationAborted(
                "database is opened read-only".to_string(),
            ));
        }
        self.ensure_file_table()
    }

    fn update_file_version(
        &mut self,
        file_name: &str,
        version: &str,
    ) -> std::result::Result<usize, StatementError> {
        let key_matches = || Expr::col(FILE_KEY_COLUMN).eq(Expr::string(file_name));

        let matched = self
            .package
            .select_rows(Select::table(FILE_TABLE).with(key_matches()))
            .map_err(classify)?
            .count();

        if matched == 0 {
            return Ok(0);
        }

        let update = Update::table(FILE_TABLE)
            .set(VERSION_COLUMN, Value::from(version))
            .with(key_matches());
        self.package.update_rows(update).map_err(classify)?;

        Ok(matched)
    }
}

/// Rejected values only affect one row; anything else means the package
/// itself can no longer be trusted.
fn classify(err: io::Error) -> StatementError {
    match err.kind() {
        io::ErrorKind::InvalidInput => StatementError::Row(err.to_string()),
        _ => StatementError::Handle(err.to_string()),
    }
}

fn validation_key() -> Expr {
    Expr::col("Table")
        .eq(Expr::string(FILE_TABLE))
        .and(Expr::col("Column").eq(Expr::string(VERSION_COLUMN)))
}

/// Category declared for `File.Version` in `_Validation`, if any.
fn version_category(package: &mut MsiPackage) -> io::Result<Option<String>> {
    if package.get_table(VALIDATION_TABLE).is_none() {
        return Ok(None);
    }

    let rows = package.select_rows(
        Select::table(VALIDATION_TABLE)
            .columns(&["Category"])
            .with(validation_key()),
    )?;
    Ok(rows
        .filter_map(|row| row["Category"].as_str().map(str::to_string))
        .next())
}

fn set_version_category(package: &mut MsiPackage, category: &str) -> io::Result<()> {
    package.update_rows(
        Update::table(VALIDATION_TABLE)
            .set("Category", Value::from(category))
            .with(validation_key()),
    )
}

/// Column checks are loaded when a package is opened, so the package is
/// reopened after lowering the category. Returns the declared category when
/// it was changed.
fn relax_version_category(mut package: MsiPackage) -> io::Result<(MsiPackage, Option<String>)> {
    let declared = version_category(&mut package)?;
    match declared.as_deref() {
        None | Some(RELAXED_CATEGORY) => Ok((package, None)),
        Some(_) => {
            set_version_category(&mut package, RELAXED_CATEGORY)?;
            let mut cursor = package.into_inner()?;
            cursor.set_position(0);
            Ok((Package::open(cursor)?, declared))
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".msiver-tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{FileVersionEntry, SkipReason, VersionPatcher};
    use crate::installer::fixtures::{
        sample_rows, write_msi, write_msi_with_version_category, write_msi_without_file_table,
    };
    use tempfile::tempdir;

    #[test]
    fn opaque_version_passes_version_category() {
        let dir = tempdir().unwrap();
        let path = write_msi_with_version_category(dir.path(), "database.msi", &sample_rows());

        let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
        let result = VersionPatcher::patch(
            &mut db,
            &[FileVersionEntry::new("Serilog.dll", "4.3.0.1-beta")],
        )
        .unwrap();
        assert_eq!(result.updated_count, 1);
        db.commit().unwrap();

        let mut reopened = MsiDatabase::open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(
            reopened.file_version("Serilog.dll").unwrap().as_deref(),
            Some("4.3.0.1-beta")
        );
        assert_eq!(
            version_category(&mut reopened.package).unwrap().as_deref(),
            Some("Version")
        );
    }

    #[test]
    fn rollback_keeps_declared_category() {
        let dir = tempdir().unwrap();
        let path = write_msi_with_version_category(dir.path(), "database.msi", &sample_rows());
        let before = fs::read(&path).unwrap();

        {
            let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
            assert_eq!(
                version_category(&mut db.package).unwrap().as_deref(),
                Some(RELAXED_CATEGORY)
            );
            db.update_file_version("Serilog.dll", "next").unwrap();
        }

        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn overlong_version_fails_one_row_only() {
        let dir = tempdir().unwrap();
        let path = write_msi(dir.path(), "database.msi", &sample_rows());
        let overlong = "9".repeat(80);

        let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
        let result = VersionPatcher::patch(
            &mut db,
            &[
                FileVersionEntry::new("Serilog.dll", overlong.as_str()),
                FileVersionEntry::new("System.Text.Json.dll", "10.0.0.0"),
            ],
        )
        .unwrap();

        assert_eq!(result.updated_count, 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].file_name, "Serilog.dll");
        assert!(matches!(result.skipped[0].reason, SkipReason::UpdateFailed(_)));
        db.commit().unwrap();

        let mut reopened = MsiDatabase::open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(
            reopened.file_version("Serilog.dll").unwrap().as_deref(),
            Some("1.0.0.0")
        );
        assert_eq!(
            reopened.file_version("System.Text.Json.dll").unwrap().as_deref(),
            Some("10.0.0.0")
        );
    }

    #[test]
    fn reads_file_versions() {
        let dir = tempdir().unwrap();
        let path = write_msi(dir.path(), "database.msi", &sample_rows());

        let mut db = MsiDatabase::open(&path, OpenMode::ReadOnly).unwrap();
        let rows = db.file_versions().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            db.file_version("Serilog.dll").unwrap().as_deref(),
            Some("1.0.0.0")
        );
        assert_eq!(db.file_version("serilog.dll").unwrap(), None);
    }

    #[test]
    fn update_then_commit_persists() {
        let dir = tempdir().unwrap();
        let path = write_msi(dir.path(), "database.msi", &sample_rows());

        let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
        db.prepare_version_update().unwrap();
        assert_eq!(db.update_file_version("Serilog.dll", "4.3.0.1"), Ok(1));
        db.commit().unwrap();

        let mut reopened = MsiDatabase::open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(
            reopened.file_version("Serilog.dll").unwrap().as_deref(),
            Some("4.3.0.1")
        );
        assert_eq!(
            reopened.file_version("System.Text.Json.dll").unwrap().as_deref(),
            Some("8.0.0.0")
        );
        assert!(!dir.path().join("database.msi.msiver-tmp").exists());
    }

    #[test]
    fn missing_key_updates_nothing_and_inserts_nothing() {
        let dir = tempdir().unwrap();
        let path = write_msi(dir.path(), "database.msi", &sample_rows());

        let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
        assert_eq!(db.update_file_version("NotPresent.dll", "1.2.3.4"), Ok(0));
        assert_eq!(db.file_versions().unwrap().len(), 2);
        assert_eq!(db.file_version("NotPresent.dll").unwrap(), None);
    }

    #[test]
    fn drop_without_commit_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = write_msi(dir.path(), "database.msi", &sample_rows());
        let before = fs::read(&path).unwrap();

        {
            let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
            db.update_file_version("Serilog.dll", "9.9.9.9").unwrap();
            assert_eq!(
                db.file_version("Serilog.dll").unwrap().as_deref(),
                Some("9.9.9.9")
            );
        }

        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn read_only_handle_cannot_commit_or_prepare() {
        let dir = tempdir().unwrap();
        let path = write_msi(dir.path(), "database.msi", &sample_rows());

        let mut db = MsiDatabase::open(&path, OpenMode::ReadOnly).unwrap();
        assert!(matches!(
            db.prepare_version_update(),
            Err(MsiverError::OperationAborted(_))
        ));
        assert!(matches!(db.commit(), Err(MsiverError::Database(_))));
    }

    #[test]
    fn missing_file_table_fails_preparation() {
        let dir = tempdir().unwrap();
        let path = write_msi_without_file_table(dir.path(), "empty.msi");

        let mut db = MsiDatabase::open(&path, OpenMode::Transact).unwrap();
        assert!(matches!(
            db.prepare_version_update(),
            Err(MsiverError::OperationAborted(_))
        ));
    }

    #[test]
    fn open_rejects_missing_and_invalid_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            MsiDatabase::open(dir.path().join("absent.msi"), OpenMode::ReadOnly),
            Err(MsiverError::Database(_))
        ));
        assert!(matches!(
            MsiDatabase::open("", OpenMode::ReadOnly),
            Err(MsiverError::Database(_))
        ));

        let bogus = dir.path().join("bogus.msi");
        fs::write(&bogus, b"definitely not a compound file").unwrap();
        assert!(matches!(
            MsiDatabase::open(&bogus, OpenMode::Transact),
            Err(MsiverError::Database(_))
        ));
    }

    #[test]
    fn staging_path_sits_next_to_target() {
        let staged = staging_path(Path::new("/tmp/out/product.msi"));
        assert_eq!(staged, PathBuf::from("/tmp/out/product.msi.msiver-tmp"));
    }
}
