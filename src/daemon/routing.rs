//! Regex routing table: first matching rule decides the destination subfolder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::RoutingRule;
use crate::daemon::paths;
use crate::error::{MonitorError, MonitorResult};

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    subfolder: PathBuf,
}

/// Ordered, compiled routing rules
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rules: Vec<CompiledRule>,
}

impl RoutingTable {
    /// Compile `rules` in order. Duplicate patterns are rejected.
    pub fn new(rules: &[RoutingRule]) -> MonitorResult<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            if !seen.insert(rule.pattern.as_str()) {
                return Err(MonitorError::configuration(format!(
                    "duplicate routing pattern: {}",
                    rule.pattern
                )));
            }
            compiled.push(CompiledRule {
                regex: Regex::new(&rule.pattern)?,
                subfolder: rule.subfolder.clone(),
            });
        }

        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Subfolder of the first rule whose pattern occurs anywhere in `file_name`.
    pub fn first_match(&self, file_name: &str) -> Option<&Path> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(file_name))
            .map(|rule| rule.subfolder.as_path())
    }

    /// `<dest_root>/<subfolder>/<basename>` for the first matching rule.
    ///
    /// An absolute subfolder replaces `dest_root`.
    pub fn destination(&self, dest_root: &Path, src: &Path) -> Option<PathBuf> {
        let file_name = src.file_name()?;
        let subfolder = self.first_match(&file_name.to_string_lossy())?;
        Some(paths::normalize(&dest_root.join(subfolder).join(file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, subfolder: &str) -> RoutingRule {
        RoutingRule { pattern: pattern.to_string(), subfolder: PathBuf::from(subfolder) }
    }

    #[test]
    fn test_first_match_wins() {
        let table = RoutingTable::new(&[rule("A.*", "f1"), rule(".*", "f2")]).unwrap();
        assert_eq!(table.first_match("ABC.txt"), Some(Path::new("f1")));
        assert_eq!(table.first_match("xyz.txt"), Some(Path::new("f2")));
    }

    #[test]
    fn test_pattern_is_searched_not_anchored() {
        let table = RoutingTable::new(&[rule("LOT[0-9]+", "lots")]).unwrap();
        assert_eq!(table.first_match("20240102_LOT42_scan.png"), Some(Path::new("lots")));
        assert_eq!(table.first_match("readme.md"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_destination_joins_root_subfolder_and_basename() {
        let table = RoutingTable::new(&[rule("\\.csv$", "tables"), rule("^abs", "/elsewhere")]).unwrap();

        let dest = table.destination(Path::new("/out"), Path::new("/in/deep/run.csv"));
        assert_eq!(dest, Some(PathBuf::from("/out/tables/run.csv")));

        let dest = table.destination(Path::new("/out"), Path::new("/in/abs.txt"));
        assert_eq!(dest, Some(PathBuf::from("/elsewhere/abs.txt")));

        assert_eq!(table.destination(Path::new("/out"), Path::new("/in/none.txt")), None);
    }

    #[test]
    fn test_invalid_and_duplicate_patterns_are_rejected() {
        assert!(matches!(
            RoutingTable::new(&[rule("(open", "x")]),
            Err(MonitorError::Pattern(_))
        ));
        assert!(matches!(
            RoutingTable::new(&[rule("a", "x"), rule("a", "y")]),
            Err(MonitorError::Configuration { .. })
        ));
    }
}
