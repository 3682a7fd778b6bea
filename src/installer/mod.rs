pub mod database;

pub use database::{FileVersionRow, MsiDatabase, OpenMode};

use crate::error::{Result, StatementError};

/// Name of the table holding per-file attributes.
pub const FILE_TABLE: &str = "File";
/// Primary-key column of the file table.
pub const FILE_KEY_COLUMN: &str = "File";
/// Column overwritten by version updates.
pub const VERSION_COLUMN: &str = "Version";

/// A row-oriented store exposing the installer file table.
///
/// The version patcher only needs two things from a store: a one-time check
/// that the update statement can run at all, and a way to execute it for one
/// file name. Implementations must not commit; committing is up to whoever
/// owns the handle.
pub trait FileTableStore {
    /// Checks that `UPDATE File SET Version = ? WHERE File = ?` can be executed.
    fn prepare_version_update(&mut self) -> Result<()>;

    /// Sets the version of every row keyed by `file_name` (exact match) and
    /// returns the number of affected rows. Never inserts.
    fn update_file_version(
        &mut self,
        file_name: &str,
        version: &str,
    ) -> std::result::Result<usize, StatementError>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{FILE_KEY_COLUMN, FILE_TABLE, VERSION_COLUMN};
    use msi::{Category, Column, Insert, Package, PackageType, Value};
    use std::fs;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};

    /// Writes an installer package with a `File` table containing `rows`.
    pub fn write_msi(dir: &Path, name: &str, rows: &[(&str, Option<&str>)]) -> PathBuf {
        build_msi(dir, name, rows, Column::build(VERSION_COLUMN).nullable().string(72))
    }

    /// Like [`write_msi`], but `Version` carries the `Version` validation
    /// category the way WiX declares it.
    pub fn write_msi_with_version_category(
        dir: &Path,
        name: &str,
        rows: &[(&str, Option<&str>)],
    ) -> PathBuf {
        let version = Column::build(VERSION_COLUMN)
            .nullable()
            .category(Category::Version)
            .string(72);
        build_msi(dir, name, rows, version)
    }

    fn build_msi(
        dir: &Path,
        name: &str,
        rows: &[(&str, Option<&str>)],
        version_column: Column,
    ) -> PathBuf {
        let cursor = Cursor::new(Vec::new());
        let mut package = Package::create(PackageType::Installer, cursor).unwrap();
        package
            .create_table(
                FILE_TABLE,
                vec![
                    Column::build(FILE_KEY_COLUMN).primary_key().id_string(72),
                    version_column,
                ],
            )
            .unwrap();

        if !rows.is_empty() {
            let mut insert = Insert::into(FILE_TABLE);
            for (file, version) in rows {
                let version = match version {
                    Some(v) => Value::from(*v),
                    None => Value::Null,
                };
                insert = insert.row(vec![Value::from(*file), version]);
            }
            package.insert_rows(insert).unwrap();
        }

        let bytes = package.into_inner().unwrap().into_inner();
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    /// Writes an installer package that has no `File` table.
    pub fn write_msi_without_file_table(dir: &Path, name: &str) -> PathBuf {
        let cursor = Cursor::new(Vec::new());
        let mut package = Package::create(PackageType::Installer, cursor).unwrap();
        package
            .create_table(
                "Property",
                vec![
                    Column::build("Property").primary_key().id_string(72),
                    Column::build("Value").string(255),
                ],
            )
            .unwrap();

        let bytes = package.into_inner().unwrap().into_inner();
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    /// The two rows used by the end-to-end scenarios.
    pub fn sample_rows() -> Vec<(&'static str, Option<&'static str>)> {
        vec![
            ("Serilog.dll", Some("1.0.0.0")),
            ("System.Text.Json.dll", Some("8.0.0.0")),
        ]
    }
}
