//! Port naming for the node system.
//!
//! Streams and side packets are referenced as `TAG:index:name`, `TAG:name`
//! or plain `name`. A node's ports of one kind form a [`TagMap`]: entries
//! are ordered by tag (alphabetically) and then by index, and each entry
//! gets a flat id used to index per-port storage. [`TaggedCollection`]
//! pairs a tag map with one value per entry.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One parsed `TAG:index:name` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexName {
    pub tag: String,
    pub index: Option<usize>,
    pub name: String,
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn parse_index(text: &str, spec: &str) -> Result<usize> {
    text.parse::<usize>()
        .map_err(|_| Error::Config(format!("invalid index \"{}\" in \"{}\"", text, spec)))
}

/// Parse `TAG:index:name`, `TAG:name` or `name`.
pub fn parse_tag_index_name(spec: &str) -> Result<TagIndexName> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (tag, index, name) = match parts.as_slice() {
        [name] => ("", None, *name),
        [tag, name] => (*tag, None, *name),
        [tag, index, name] => (*tag, Some(parse_index(index, spec)?), *name),
        _ => {
            return Err(Error::Config(format!(
                "\"{}\" is not of the form TAG:index:name",
                spec
            )))
        }
    };
    if !tag.is_empty() && !is_valid_tag(tag) {
        return Err(Error::Config(format!("invalid tag \"{}\" in \"{}\"", tag, spec)));
    }
    if !is_valid_name(name) {
        return Err(Error::Config(format!("invalid name \"{}\" in \"{}\"", name, spec)));
    }
    Ok(TagIndexName {
        tag: tag.to_string(),
        index,
        name: name.to_string(),
    })
}

/// Parse `TAG:index`, `TAG` (index 0) or `:index` (untagged).
pub fn parse_tag_index(spec: &str) -> Result<(String, usize)> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (tag, index) = match parts.as_slice() {
        [tag] => (*tag, 0),
        [tag, index] => (*tag, parse_index(index, spec)?),
        _ => {
            return Err(Error::Config(format!(
                "\"{}\" is not of the form TAG:index",
                spec
            )))
        }
    };
    if !tag.is_empty() && !is_valid_tag(tag) {
        return Err(Error::Config(format!("invalid tag \"{}\" in \"{}\"", tag, spec)));
    }
    Ok((tag.to_string(), index))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagData {
    base: usize,
    count: usize,
}

/// Tag/index layout of one kind of port on a node.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct TagMap {
    tags: BTreeMap<String, TagData>,
    /// Stream or side packet name per flat id.
    names: Vec<String>,
}

impl TagMap {
    /// Build from `TAG:index:name` references as they appear in a node config.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<TagMap> {
        let mut by_tag: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();
        for spec in specs {
            let parsed = parse_tag_index_name(spec.as_ref())?;
            let entries = by_tag.entry(parsed.tag.clone()).or_default();
            let index = parsed.index.unwrap_or(entries.len());
            entries.push((index, parsed.name));
        }

        let mut tags = BTreeMap::new();
        let mut names = Vec::new();
        for (tag, mut entries) in by_tag {
            entries.sort_by_key(|(index, _)| *index);
            for (expected, (index, _)) in entries.iter().enumerate() {
                if *index != expected {
                    return Err(Error::Config(format!(
                        "tag \"{}\" has indices that are not exactly 0..{}",
                        tag,
                        entries.len()
                    )));
                }
            }
            tags.insert(
                tag,
                TagData {
                    base: names.len(),
                    count: entries.len(),
                },
            );
            names.extend(entries.into_iter().map(|(_, name)| name));
        }
        Ok(TagMap { tags, names })
    }

    /// Total number of entries across all tags.
    #[inline]
    pub fn num_entries(&self) -> usize {
        self.names.len()
    }

    pub fn num_entries_for(&self, tag: &str) -> usize {
        self.tags.get(tag).map(|d| d.count).unwrap_or(0)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Flat id of `tag:index`.
    pub fn get_id(&self, tag: &str, index: usize) -> Option<usize> {
        let data = self.tags.get(tag)?;
        (index < data.count).then_some(data.base + index)
    }

    /// Flat id range covered by `tag`.
    pub fn id_range(&self, tag: &str) -> std::ops::Range<usize> {
        self.tags
            .get(tag)
            .map(|d| d.base..d.base + d.count)
            .unwrap_or(0..0)
    }

    /// Tag and index of a flat id.
    pub fn tag_and_index(&self, id: usize) -> Option<(&str, usize)> {
        self.tags
            .iter()
            .find(|(_, d)| id >= d.base && id < d.base + d.count)
            .map(|(tag, d)| (tag.as_str(), id - d.base))
    }

    /// Stream or side packet name of a flat id.
    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `TAG:index` label for error messages.
    pub fn label(&self, id: usize) -> String {
        match self.tag_and_index(id) {
            Some((tag, index)) => format!("{}:{}", tag, index),
            None => format!("#{}", id),
        }
    }
}

impl fmt::Debug for TagMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = (0..self.names.len())
            .map(|id| format!("{}:{}", self.label(id), self.names[id]))
            .collect();
        f.debug_list().entries(entries).finish()
    }
}

/// One value per entry of a shared [`TagMap`].
#[derive(Clone)]
pub struct TaggedCollection<T> {
    map: Arc<TagMap>,
    items: Vec<T>,
}

impl<T> TaggedCollection<T> {
    pub fn from_fn(map: Arc<TagMap>, mut f: impl FnMut(usize) -> T) -> Self {
        let items = (0..map.num_entries()).map(&mut f).collect();
        Self { map, items }
    }

    pub fn tag_map(&self) -> &Arc<TagMap> {
        &self.map
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.map.has_tag(tag)
    }

    pub fn num_entries_for(&self, tag: &str) -> usize {
        self.map.num_entries_for(tag)
    }

    pub fn get(&self, tag: &str, index: usize) -> Option<&T> {
        self.map.get_id(tag, index).map(|id| &self.items[id])
    }

    pub fn get_mut(&mut self, tag: &str, index: usize) -> Option<&mut T> {
        self.map.get_id(tag, index).map(move |id| &mut self.items[id])
    }

    /// Entry by flat id.
    #[inline]
    pub fn by_id(&self, id: usize) -> &T {
        &self.items[id]
    }

    #[inline]
    pub fn by_id_mut(&mut self, id: usize) -> &mut T {
        &mut self.items[id]
    }

    /// All entries under `tag`, in index order.
    pub fn tag(&self, tag: &str) -> &[T] {
        &self.items[self.map.id_range(tag)]
    }

    pub fn tag_mut(&mut self, tag: &str) -> &mut [T] {
        let range = self.map.id_range(tag);
        &mut self.items[range]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for TaggedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries((0..self.items.len()).map(|id| (self.map.label(id), &self.items[id])))
            .finish()
    }
}
