//! Active scope: a working subset of the index, such as a loaded deck.

use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;

use crate::brain::{normalize_name, ReferenceIndex};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveScope {
    /// Sorted, deduplicated entry ids.
    ids: Vec<u32>,
    names: Vec<String>,
    unresolved: Vec<String>,
}

impl ActiveScope {
    /// Resolves card names to every print of that name in the index.
    pub fn resolve(index: &ReferenceIndex, names: &[String]) -> Self {
        let mut ids = Vec::new();
        let mut unresolved = Vec::new();
        for name in names {
            let found = index.resolve_name(name);
            if found.is_empty() {
                unresolved.push(name.clone());
            } else {
                ids.extend_from_slice(found);
            }
        }
        ids.sort_unstable();
        ids.dedup();
        Self {
            ids,
            names: names.to_vec(),
            unresolved,
        }
    }

    pub fn from_ids(mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }
}

/// Shared slot holding the current scope. Loads swap in a whole new
/// `Arc`, so a request holding a snapshot never sees a half-updated set.
#[derive(Debug, Default)]
pub struct ScopeHandle {
    current: RwLock<Option<Arc<ActiveScope>>>,
}

impl ScopeHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<ActiveScope>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, scope: ActiveScope) -> Arc<ActiveScope> {
        let scope = Arc::new(scope);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(scope.clone());
        scope
    }

    pub fn clear(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

fn deck_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\d+\s*[xX]?\s+)?(?P<name>.+?)(?:\s+\([A-Za-z0-9_]+\)(?:\s+[A-Za-z0-9\-]+)?)?\s*$")
            .expect("deck line regex")
    })
}

fn section_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(deck|main ?deck|sideboard|commander|companion|maybeboard)\s*:?$")
            .expect("section header regex")
    })
}

/// Card names from a plain or Arena/MTGO-style deck list, first occurrence
/// order, duplicates dropped.
pub fn parse_scope_list(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for raw in text.lines() {
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        if section_header_regex().is_match(line) {
            continue;
        }
        if let Some(rest) = line.strip_prefix("SB:") {
            line = rest.trim_start();
        }
        let Some(caps) = deck_line_regex().captures(line) else {
            continue;
        };
        let name = caps["name"].trim();
        if name.is_empty() {
            continue;
        }
        let key = normalize_name(name);
        if !names.iter().any(|n| normalize_name(n) == key) {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arena_and_plain_lines() {
        let text = "Deck\n4 Lightning Bolt\n2x Counterspell (MH2) 267\n\n# burn\nSideboard\nSB: 1 Pyroblast\nFire // Ice\nlightning bolt\n// note\n";
        assert_eq!(
            parse_scope_list(text),
            vec!["Lightning Bolt", "Counterspell", "Pyroblast", "Fire // Ice"]
        );
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(parse_scope_list("\n \n# only comments\n").is_empty());
    }

    #[test]
    fn from_ids_sorts_and_dedups() {
        let scope = ActiveScope::from_ids(vec![5, 1, 5, 3]);
        assert_eq!(scope.ids(), &[1, 3, 5]);
        assert!(scope.contains(3));
        assert!(!scope.contains(2));
    }

    #[test]
    fn handle_swaps_whole_scope() {
        let handle = ScopeHandle::new();
        assert!(handle.snapshot().is_none());
        let old = handle.replace(ActiveScope::from_ids(vec![1, 2]));
        let held = handle.snapshot().unwrap();
        handle.replace(ActiveScope::from_ids(vec![9]));
        assert_eq!(held.ids(), &[1, 2]);
        assert_eq!(old.ids(), held.ids());
        assert_eq!(handle.snapshot().unwrap().ids(), &[9]);
        handle.clear();
        assert!(handle.snapshot().is_none());
    }
}
