//! path metadata keyed by normalized path, with tag inheritance
//!
//! parent links are lookup keys into the same map, so the graph is a flat
//! set of records and can never form an ownership cycle. a malformed chain
//! that revisits a path stops resolution where the loop closes.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::error::{Error, ErrorContext, Result};
use crate::format::{FileEntry, PathMetadataEntry, Validate};
use crate::path;
use crate::tags::Tag;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathMetadataGraph {
    entries: BTreeMap<String, PathMetadataEntry>,
}

impl PathMetadataGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// build a graph from decoded entries; later duplicates replace earlier ones
    pub fn from_entries(entries: impl IntoIterator<Item = PathMetadataEntry>) -> Result<Self> {
        let mut graph = Self::new();
        for entry in entries {
            graph.insert(entry)?;
        }
        Ok(graph)
    }

    /// add or replace the entry for its path
    pub fn insert(&mut self, entry: PathMetadataEntry) -> Result<Option<PathMetadataEntry>> {
        entry.validate()?;
        Ok(self.entries.insert(entry.key().to_string(), entry))
    }

    /// resolve a caller supplied path to the key it is stored under
    fn key_for(&self, raw: &str) -> Option<String> {
        if self.entries.contains_key(raw) {
            return Some(raw.to_string());
        }
        let normalized = path::normalize(raw).ok()?;
        if self.entries.contains_key(&normalized) {
            return Some(normalized);
        }
        let dir = path::normalize_dir(raw).ok()?;
        self.entries.contains_key(&dir).then_some(dir)
    }

    pub fn get(&self, path: &str) -> Option<&PathMetadataEntry> {
        let key = self.key_for(path)?;
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut PathMetadataEntry> {
        let key = self.key_for(path)?;
        self.entries.get_mut(&key)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.key_for(path).is_some()
    }

    pub fn remove(&mut self, path: &str) -> Result<PathMetadataEntry> {
        self.key_for(path)
            .and_then(|key| self.entries.remove(&key))
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// entries in path order
    pub fn iter(&self) -> impl Iterator<Item = &PathMetadataEntry> {
        self.entries.values()
    }

    /// give every entry without a parent its nearest existing ancestor directory
    pub fn link_parents(&mut self) -> usize {
        let mut links = Vec::new();
        for (key, entry) in &self.entries {
            if entry.parent_path.is_some() {
                continue;
            }
            let mut current = path::parent_dir(key);
            while let Some(dir) = current {
                if self.entries.contains_key(dir) {
                    links.push((key.clone(), dir.to_string()));
                    break;
                }
                current = path::parent_dir(dir);
            }
        }

        let linked = links.len();
        for (key, parent) in links {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.parent_path = Some(parent);
            }
        }
        debug!(linked, "linked path metadata parents");
        linked
    }

    /// walk the parent chain of `start`, closest first
    ///
    /// returns the ancestors and the path where a cycle closed, if any.
    fn chain<'a>(&'a self, start: &'a PathMetadataEntry) -> (Vec<&'a PathMetadataEntry>, Option<&'a str>) {
        let mut seen = HashSet::new();
        seen.insert(start.key());
        let mut out = Vec::new();
        let mut current = start.parent_path.as_deref();

        while let Some(parent) = current {
            if !seen.insert(parent) {
                return (out, Some(parent));
            }
            let Some(entry) = self.entries.get(parent) else {
                break;
            };
            out.push(entry);
            current = entry.parent_path.as_deref();
        }
        (out, None)
    }

    fn entry(&self, path: &str) -> Result<&PathMetadataEntry> {
        self.get(path)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    /// ancestors of `path`, closest first, stopping at a cycle
    pub fn ancestors(&self, path: &str) -> Result<Vec<&PathMetadataEntry>> {
        let entry = self.entry(path)?;
        let (ancestors, cycle) = self.chain(entry);
        if let Some(at) = cycle {
            warn!(path = entry.key(), cycle_at = at, "parent path cycle");
        }
        Ok(ancestors)
    }

    /// tags handed down by ancestors with inheritance enabled; higher
    /// priority wins, the closer level breaks ties
    fn collect_inherited(&self, entry: &PathMetadataEntry, seen: &mut HashSet<String>) -> Vec<Tag> {
        let (ancestors, cycle) = self.chain(entry);
        if let Some(at) = cycle {
            warn!(path = entry.key(), cycle_at = at, "parent path cycle, returning partial tags");
        }

        // chain is closest first and the sort is stable
        let mut donors: Vec<&PathMetadataEntry> =
            ancestors.into_iter().filter(|a| a.inherits()).collect();
        donors.sort_by_key(|a| Reverse(a.inheritance.map_or(0, |i| i.priority)));

        let mut out = Vec::new();
        for ancestor in donors {
            for tag in ancestor.properties.iter() {
                if seen.insert(tag.key.clone()) {
                    out.push(tag.clone());
                }
            }
        }
        out
    }

    /// own tags followed by inherited tags not already set
    pub fn effective_tags(&self, path: &str) -> Result<Vec<Tag>> {
        let entry = self.entry(path)?;
        let mut seen: HashSet<String> = entry.properties.keys().map(str::to_string).collect();
        let mut tags: Vec<Tag> = entry.properties.iter().cloned().collect();
        tags.extend(self.collect_inherited(entry, &mut seen));
        Ok(tags)
    }

    /// only what came from ancestors
    pub fn inherited_tags(&self, path: &str) -> Result<Vec<Tag>> {
        let entry = self.entry(path)?;
        Ok(self.collect_inherited(entry, &mut HashSet::new()))
    }

    /// report the first parent cycle as corruption
    pub fn check_chains(&self) -> Result<()> {
        for entry in self.entries.values() {
            if let (_, Some(at)) = self.chain(entry) {
                return Err(Error::ParentCycle(at.to_string()));
            }
        }
        Ok(())
    }

    /// link `file` to the entry stored for `path`; one of the file's paths must match it
    pub fn associate(&self, file: &mut FileEntry, path: &str) -> Result<()> {
        let entry = self.entry(path)?;
        if !file.has_path(entry.key()) {
            return Err(Error::validation(
                "file has no path matching the path metadata entry",
                ErrorContext::new(
                    "Path",
                    entry.key(),
                    format!(
                        "one of [{}]",
                        file.paths.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                ),
            ));
        }
        file.path_metadata_links
            .insert(entry.key().to_string(), entry.key().to_string());
        Ok(())
    }

    /// link every path of `file` that has an entry; returns how many were linked
    pub fn associate_all(&self, file: &mut FileEntry) -> usize {
        let keys: Vec<String> = file
            .paths
            .iter()
            .filter(|p| self.entries.contains_key(p.as_str()))
            .map(|p| p.path.clone())
            .collect();
        for key in &keys {
            file.path_metadata_links.insert(key.clone(), key.clone());
        }
        keys.len()
    }

    /// the file's own tags, then tags from each linked path entry
    pub fn file_effective_tags(&self, file: &FileEntry) -> Vec<Tag> {
        let mut seen: HashSet<String> = file.tags.keys().map(str::to_string).collect();
        let mut tags: Vec<Tag> = file.tags.iter().cloned().collect();

        for key in file.path_metadata_links.values() {
            let Ok(linked) = self.effective_tags(key) else {
                continue;
            };
            for tag in linked {
                if seen.insert(tag.key.clone()) {
                    tags.push(tag);
                }
            }
        }
        tags
    }
}
