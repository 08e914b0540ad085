//! Filesystem storage of migration scripts.
//!
//! Scripts live directly under one directory and are named
//! `<version>_<slug>.sql`. A `<version>_rollback.sql` file is the companion
//! rollback script of that version, never a forward unit.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::TRACING_TARGET_MIGRATION;
use crate::error::{DbError, DbResult};
use crate::migrate::unit::{MigrationUnit, ROLLBACK_SLUG, parse_filename, parse_version};

/// Width new versions are padded to, unless existing files use a wider one.
const MIN_VERSION_WIDTH: usize = 3;

/// Rollback companion of a migration version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackScript {
    pub version: String,
    pub path: PathBuf,
    pub content: String,
}

/// Discovers, reads and authors migration scripts in one directory.
#[derive(Debug, Clone)]
pub struct MigrationRepository {
    root: PathBuf,
}

impl MigrationRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every forward unit, ordered by numeric version.
    ///
    /// Files not matching the naming pattern are skipped, as are files whose
    /// version does not fit in a `u64`. A missing directory holds no units.
    /// Content is re-read on every call.
    ///
    /// # Errors
    ///
    /// - `DuplicateVersion` if two files share the same numeric version
    /// - `Io` if the directory or a script cannot be read
    pub fn discover(&self) -> DbResult<Vec<MigrationUnit>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    target: TRACING_TARGET_MIGRATION,
                    root = %self.root.display(),
                    "Migration directory does not exist"
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(DbError::io(&self.root, err)),
        };

        let mut units = Vec::new();
        let mut seen: HashMap<u64, String> = HashMap::new();

        for entry in entries {
            let entry = entry.map_err(|err| DbError::io(&self.root, err))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some((version, slug)) = parse_filename(filename) else {
                continue;
            };
            if slug == ROLLBACK_SLUG {
                continue;
            }

            let number = parse_version(version).unwrap_or(u64::MAX);
            if let Some(other) = seen.insert(number, filename.to_string()) {
                tracing::error!(
                    target: TRACING_TARGET_MIGRATION,
                    version,
                    first = %other,
                    second = %filename,
                    "Two migration files share a version"
                );
                return Err(DbError::DuplicateVersion(version.to_string()));
            }

            let content = fs::read_to_string(&path).map_err(|err| DbError::io(&path, err))?;
            units.push(MigrationUnit::new(
                version.to_string(),
                filename.to_string(),
                path.clone(),
                content,
            ));
        }

        units.sort_by_key(MigrationUnit::version_number);
        Ok(units)
    }

    /// Read the companion rollback script of `version`, if one exists.
    pub fn rollback_script(&self, version: &str) -> DbResult<Option<RollbackScript>> {
        let path = self.root.join(format!("{version}_{ROLLBACK_SLUG}.sql"));
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(RollbackScript {
                version: version.to_string(),
                path,
                content,
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(DbError::io(&path, err)),
        }
    }

    /// Author a new unit with the next free version.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if `name` sanitizes to an unusable slug; nothing is written
    /// - `VersionExhausted` if the highest version is `u64::MAX`; nothing is written
    /// - `Io` if the file cannot be created or already exists
    pub fn create(&self, name: &str, content: &str) -> DbResult<MigrationUnit> {
        let slug = sanitize_name(name)?;
        let existing = self.discover()?;

        let next = match existing.iter().max_by_key(|unit| unit.version_number()) {
            Some(last) => last
                .version_number()
                .checked_add(1)
                .ok_or_else(|| DbError::VersionExhausted(last.version.clone()))?,
            None => 1,
        };
        let width = existing
            .iter()
            .map(|unit| unit.version.len())
            .max()
            .unwrap_or(0)
            .max(MIN_VERSION_WIDTH);
        let version = format!("{next:0width$}");
        let filename = format!("{version}_{slug}.sql");

        fs::create_dir_all(&self.root).map_err(|err| DbError::io(&self.root, err))?;
        let path = self.root.join(&filename);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| DbError::io(&path, err))?;
        file.write_all(content.as_bytes())
            .map_err(|err| DbError::io(&path, err))?;

        tracing::info!(target: TRACING_TARGET_MIGRATION, %filename, "Created migration file");
        Ok(MigrationUnit::new(version, filename, path, content.to_string()))
    }
}

/// Lowercase `name`, replacing every character outside `[a-z0-9_]` with `_`.
fn sanitize_name(name: &str) -> DbResult<String> {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !slug.chars().any(|c| c.is_ascii_alphanumeric()) || slug == ROLLBACK_SLUG {
        return Err(DbError::InvalidName(name.to_string()));
    }
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn discovers_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10_ten.sql", "SELECT 10;");
        write(dir.path(), "2_two.sql", "SELECT 2;");
        write(dir.path(), "1_one.sql", "SELECT 1;");

        let repo = MigrationRepository::new(dir.path());
        let versions: Vec<String> = repo
            .discover()
            .unwrap()
            .into_iter()
            .map(|unit| unit.version)
            .collect();
        assert_eq!(versions, vec!["1", "2", "10"]);
    }

    #[test]
    fn skips_unrelated_and_rollback_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001_init.sql", "CREATE TABLE t (id INT);");
        write(dir.path(), "001_rollback.sql", "DROP TABLE t;");
        write(dir.path(), "README.md", "docs");
        write(dir.path(), "notes.sql", "SELECT 1;");
        fs::create_dir(dir.path().join("002_dir.sql")).unwrap();

        let units = MigrationRepository::new(dir.path()).discover().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].filename, "001_init.sql");
        assert_eq!(units[0].content, "CREATE TABLE t (id INT);");
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MigrationRepository::new(dir.path().join("absent"));
        assert!(repo.discover().unwrap().is_empty());
        assert!(repo.rollback_script("001").unwrap().is_none());
    }

    #[test]
    fn duplicate_numeric_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_a.sql", "SELECT 1;");
        write(dir.path(), "001_b.sql", "SELECT 1;");

        let err = MigrationRepository::new(dir.path()).discover().unwrap_err();
        assert!(matches!(err, DbError::DuplicateVersion(_)));
    }

    #[test]
    fn create_assigns_next_version() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MigrationRepository::new(dir.path().join("migrations"));

        let first = repo.create("Init Schema", "CREATE TABLE t (id INT);").unwrap();
        assert_eq!(first.version, "001");
        assert_eq!(first.filename, "001_init_schema.sql");
        assert_eq!(
            fs::read_to_string(&first.path).unwrap(),
            "CREATE TABLE t (id INT);"
        );

        let second = repo.create("add-col!", "ALTER TABLE t ADD c INT;").unwrap();
        assert_eq!(second.filename, "002_add_col_.sql");
        assert_eq!(repo.discover().unwrap().len(), 2);
    }

    #[test]
    fn create_keeps_existing_width() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "0009_nine.sql", "SELECT 9;");
        write(dir.path(), "3_three.sql", "SELECT 3;");

        let unit = MigrationRepository::new(dir.path())
            .create("next", "SELECT 10;")
            .unwrap();
        assert_eq!(unit.version, "0010");
    }

    #[test]
    fn create_rejects_empty_slug() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MigrationRepository::new(dir.path());

        assert!(matches!(repo.create("", "x"), Err(DbError::InvalidName(_))));
        assert!(matches!(repo.create("?!", "x"), Err(DbError::InvalidName(_))));
        assert!(matches!(
            repo.create("Rollback", "x"),
            Err(DbError::InvalidName(_))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn create_refuses_to_wrap_the_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "18446744073709551615_max.sql", "SELECT 1;");

        let repo = MigrationRepository::new(dir.path());
        let err = repo.create("next", "SELECT 2;").unwrap_err();
        assert!(matches!(err, DbError::VersionExhausted(v) if v == "18446744073709551615"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn oversized_versions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "18446744073709551616_big.sql", "SELECT 1;");
        write(dir.path(), "001_init.sql", "SELECT 1;");

        let units = MigrationRepository::new(dir.path()).discover().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].version, "001");
    }

    #[test]
    fn reads_rollback_companion() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "002_add_col.sql", "ALTER TABLE t ADD c INT;");
        write(dir.path(), "002_rollback.sql", "ALTER TABLE t DROP c;");

        let repo = MigrationRepository::new(dir.path());
        let script = repo.rollback_script("002").unwrap().unwrap();
        assert_eq!(script.content, "ALTER TABLE t DROP c;");
        assert!(repo.rollback_script("001").unwrap().is_none());
    }
}
