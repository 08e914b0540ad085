//! Migration units and their script text.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_(.+)\.sql$").expect("filename pattern is valid"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)--.*$").expect("line comment pattern is valid"));

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern is valid"));

/// Slug reserved for companion rollback scripts.
pub(crate) const ROLLBACK_SLUG: &str = "rollback";

/// One versioned migration script, as read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub version: String,
    pub filename: String,
    pub path: PathBuf,
    pub content: String,
    pub checksum: String,
}

impl MigrationUnit {
    pub fn new(version: String, filename: String, path: PathBuf, content: String) -> Self {
        let checksum = checksum(&content);
        Self {
            version,
            filename,
            path,
            content,
            checksum,
        }
    }

    /// Numeric value of the version, the key that orders units.
    pub fn version_number(&self) -> u64 {
        parse_version(&self.version).unwrap_or(u64::MAX)
    }

    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.content)
    }
}

/// Split `<version>_<slug>.sql` into its version and slug.
///
/// Returns `None` for names that do not follow the pattern.
pub fn parse_filename(filename: &str) -> Option<(&str, &str)> {
    let captures = FILENAME.captures(filename)?;
    let version = captures.get(1)?.as_str();
    let slug = captures.get(2)?.as_str();
    parse_version(version)?;
    Some((version, slug))
}

pub(crate) fn parse_version(version: &str) -> Option<u64> {
    version.parse().ok()
}

/// SHA-256 of the UTF-8 content, hex encoded.
pub fn checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Best-effort split of a script into statements.
///
/// Strips `--` line comments, then `/* ... */` block comments, then splits on
/// `;` and drops empty fragments. This is lexical only: a `;` or a comment
/// marker inside a string literal or a dollar-quoted body is mangled too.
/// Such statements are not supported in migration scripts.
pub fn split_statements(content: &str) -> Vec<String> {
    let without_lines = LINE_COMMENT.replace_all(content, "");
    let without_blocks = BLOCK_COMMENT.replace_all(&without_lines, "");

    without_blocks
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_versioned_filenames() {
        assert_eq!(parse_filename("001_init.sql"), Some(("001", "init")));
        assert_eq!(parse_filename("10_add_col.sql"), Some(("10", "add_col")));
        assert_eq!(parse_filename("init.sql"), None);
        assert_eq!(parse_filename("001_init.txt"), None);
        assert_eq!(parse_filename("001init.sql"), None);
        assert_eq!(parse_filename("v1_init.sql"), None);
    }

    #[test]
    fn splits_and_strips_comments() {
        let script = r#"
            -- create the table
            CREATE TABLE t (id INT);
            /* a block
               comment; with a separator */
            ALTER TABLE t ADD COLUMN name TEXT; -- trailing
            ;;
            INSERT INTO t (id) VALUES (1)
        "#;
        assert_eq!(
            split_statements(script),
            vec![
                "CREATE TABLE t (id INT)",
                "ALTER TABLE t ADD COLUMN name TEXT",
                "INSERT INTO t (id) VALUES (1)",
            ]
        );
    }

    #[test]
    fn comment_only_script_has_no_statements() {
        assert!(split_statements("-- nothing here\n/* or here */\n").is_empty());
        assert!(split_statements("").is_empty());
    }

    #[test]
    fn semicolons_in_literals_are_split() {
        // Known limitation of the lexical split.
        let statements = split_statements("INSERT INTO t VALUES ('a;b');");
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('a", "b')"]);
    }

    #[test]
    fn checksum_is_deterministic() {
        let content = "CREATE TABLE t (id INT);";
        assert_eq!(checksum(content), checksum(content));
        assert_eq!(checksum(content).len(), 64);
        assert_ne!(checksum(content), checksum("CREATE TABLE t (id INT)."));
    }

    #[test]
    fn unit_computes_checksum_and_number() {
        let unit = MigrationUnit::new(
            "010".into(),
            "010_x.sql".into(),
            PathBuf::from("010_x.sql"),
            "SELECT 1".into(),
        );
        assert_eq!(unit.version_number(), 10);
        assert_eq!(unit.checksum, checksum("SELECT 1"));
        assert_eq!(unit.statements(), vec!["SELECT 1"]);
    }
}
