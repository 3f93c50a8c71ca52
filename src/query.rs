//! Glob queries over the entry tree.
//!
//! A [`Query`] is a filter builder: shell-glob name matching plus exact or
//! ordered comparisons on the remaining entry fields.  Evaluation is a full
//! scan of the entry tree — the registries index identity and paths, not
//! attributes, so attribute search pays the linear price.

use glob::Pattern;
use uuid::Uuid;

use crate::entry::Entry;
use crate::error::{Error, Result};

/// Comparison operator for timestamp filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Unequal,
    Less,
    Greater,
}

impl Comparison {
    fn holds(self, value: i64, probe: i64) -> bool {
        match self {
            Comparison::Equal => value == probe,
            Comparison::Unequal => value != probe,
            Comparison::Less => value < probe,
            Comparison::Greater => value > probe,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Query {
    name: Option<Pattern>,
    parent: Option<Uuid>,
    owner: Option<Uuid>,
    deleted: Option<bool>,
    user: Option<String>,
    group: Option<String>,
    created: Option<(Comparison, i64)>,
    modified: Option<(Comparison, i64)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shell-glob filter on the entry name: `*` matches any run, `?` one
    /// character.
    pub fn name(mut self, pattern: &str) -> Result<Self> {
        let compiled = Pattern::new(pattern)
            .map_err(|err| Error::Argument(format!("Bad glob pattern: {err}")))?;
        self.name = Some(compiled);
        Ok(self)
    }

    pub fn parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn owner(mut self, owner: Uuid) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn created(mut self, comparison: Comparison, timestamp: i64) -> Self {
        self.created = Some((comparison, timestamp));
        self
    }

    pub fn modified(mut self, comparison: Comparison, timestamp: i64) -> Self {
        self.modified = Some((comparison, timestamp));
        self
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(pattern) = &self.name {
            if !pattern.matches(&entry.name) {
                return false;
            }
        }
        if let Some(parent) = self.parent {
            if entry.parent != parent {
                return false;
            }
        }
        if let Some(owner) = self.owner {
            if entry.owner != owner {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if entry.deleted != deleted {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if &entry.user != user {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if &entry.group != group {
                return false;
            }
        }
        if let Some((comparison, probe)) = self.created {
            if !comparison.holds(entry.created, probe) {
                return false;
            }
        }
        if let Some((comparison, probe)) = self.modified {
            if !comparison.holds(entry.modified, probe) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Entry {
        Entry::file(Uuid::new_v4(), Uuid::nil(), name)
    }

    #[test]
    fn glob_name_matching() {
        let query = Query::new().name("*.bin").unwrap();
        assert!(query.matches(&sample("data.bin")));
        assert!(!query.matches(&sample("data.txt")));

        let query = Query::new().name("file-?").unwrap();
        assert!(query.matches(&sample("file-a")));
        assert!(!query.matches(&sample("file-ab")));
    }

    #[test]
    fn bad_pattern_is_an_argument_error() {
        assert!(matches!(Query::new().name("[unclosed"), Err(Error::Argument(_))));
    }

    #[test]
    fn filters_combine_conjunctively() {
        let parent = Uuid::new_v4();
        let mut entry = sample("x.bin");
        entry.parent = parent;
        entry.created = 1_000;

        let query = Query::new()
            .name("*.bin")
            .unwrap()
            .parent(parent)
            .deleted(false)
            .created(Comparison::Less, 2_000);
        assert!(query.matches(&entry));

        let query = Query::new().parent(parent).deleted(true);
        assert!(!query.matches(&entry));
    }

    #[test]
    fn timestamp_comparisons() {
        let mut entry = sample("t");
        entry.modified = 50;
        assert!(Query::new().modified(Comparison::Equal, 50).matches(&entry));
        assert!(Query::new().modified(Comparison::Unequal, 49).matches(&entry));
        assert!(Query::new().modified(Comparison::Greater, 49).matches(&entry));
        assert!(!Query::new().modified(Comparison::Less, 50).matches(&entry));
    }
}
