//! Identifier escaping shared by the SQL renderer, the executor's column
//! resolution and the id map's table naming.
//!
//! Every identifier that ends up in a query goes through [`IdentifierQuoter`],
//! so a column name the map store creates is the same string the augmented
//! query later refers to.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNSAFE_IDENTIFIER_CHARS: Regex =
        Regex::new(r"[^A-Za-z0-9_]+").expect("identifier pattern is valid");
    static ref UNSAFE_MACHINE_NAME_CHARS: Regex =
        Regex::new(r"[^a-z0-9_]+").expect("machine name pattern is valid");
}

/// Longest identifier accepted by the strictest supported driver.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierQuoter {
    open: char,
    close: char,
}

impl IdentifierQuoter {
    /// ANSI double-quote quoting.
    pub const fn ansi() -> Self {
        Self { open: '"', close: '"' }
    }

    pub fn for_driver(driver: &str) -> Self {
        match driver {
            "mysql" => Self { open: '`', close: '`' },
            "sqlsrv" => Self { open: '[', close: ']' },
            _ => Self::ansi(),
        }
    }

    /// Strip everything that is not `[A-Za-z0-9_]`.
    pub fn escape_identifier(&self, name: &str) -> String {
        UNSAFE_IDENTIFIER_CHARS.replace_all(name, "").into_owned()
    }

    /// Escape a possibly qualified name (`alias.column`, `database.table`),
    /// keeping the dots between parts.
    pub fn escape_field(&self, field: &str) -> String {
        field
            .split('.')
            .map(|part| self.escape_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        format!("{}{}{}", self.open, self.escape_identifier(name), self.close)
    }

    pub fn quote_field(&self, field: &str) -> String {
        field
            .split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Two identifiers name the same thing once escaped.
    pub fn same_identifier(&self, a: &str, b: &str) -> bool {
        self.escape_identifier(a) == self.escape_identifier(b)
    }

    /// Lowercase machine name: runs of characters outside `[a-z0-9_]` become
    /// a single underscore, result truncated to `max_len`.
    pub fn machine_name(&self, raw: &str, max_len: usize) -> String {
        let lowered = raw.to_lowercase();
        let mut name = UNSAFE_MACHINE_NAME_CHARS.replace_all(&lowered, "_").into_owned();
        if name.len() > max_len {
            name.truncate(max_len);
        }
        name
    }
}

impl Default for IdentifierQuoter {
    fn default() -> Self {
        Self::ansi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_strips_unsafe_chars() {
        let q = IdentifierQuoter::ansi();
        assert_eq!(q.escape_identifier("node; DROP TABLE x"), "nodeDROPTABLEx");
        assert_eq!(q.escape_field("n.changed"), "n.changed");
    }

    #[test]
    fn test_quote_per_driver() {
        assert_eq!(IdentifierQuoter::ansi().quote_field("map.destid1"), "\"map\".\"destid1\"");
        assert_eq!(IdentifierQuoter::for_driver("mysql").quote_identifier("nid"), "`nid`");
        assert_eq!(IdentifierQuoter::for_driver("sqlsrv").quote_identifier("nid"), "[nid]");
    }

    #[test]
    fn test_machine_name() {
        let q = IdentifierQuoter::ansi();
        assert_eq!(q.machine_name("D7 Node:Article", 63), "d7_node_article");
        assert_eq!(q.machine_name(&"x".repeat(80), 10).len(), 10);
    }

    #[test]
    fn test_same_identifier_ignores_escaping() {
        let q = IdentifierQuoter::ansi();
        assert!(q.same_identifier("source-id1", "sourceid1"));
        assert!(!q.same_identifier("sourceid1", "sourceid2"));
    }
}
