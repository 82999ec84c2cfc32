//! Bidirectional key/tag index.
//!
//! `key_to_tags` and `tag_to_keys` are mirror images: a `(key, tag)` pair is
//! present in one map iff it is present in the other. Every mutation for a
//! key is made by [`TagCache`](crate::TagCache) while it holds that key's
//! entry lock, so pairs for one key never race with each other. Mutations
//! never hold a guard on one map while touching the other.
//!
//! Each tag also carries a generation that only grows. It is bumped on every
//! invalidation of the tag and outlives the tag's keys.

use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TagIndex {
    key_to_tags: DashMap<String, HashSet<String>>,
    tag_to_keys: DashMap<String, HashSet<String>>,
    generations: DashMap<String, u64>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` under each of `tags`.
    pub fn associate(&self, key: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        self.key_to_tags
            .entry(key.to_string())
            .or_default()
            .extend(tags.iter().cloned());

        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Drops every association of `key` and returns the tags it had.
    ///
    /// Tags left without keys are removed.
    pub fn dissociate(&self, key: &str) -> Vec<String> {
        let Some((_, tags)) = self.key_to_tags.remove(key) else {
            return Vec::new();
        };

        for tag in &tags {
            self.tag_to_keys.remove_if_mut(tag, |_, keys| {
                keys.remove(key);
                keys.is_empty()
            });
        }
        tags.into_iter().collect()
    }

    /// Advances the generation of `tag`.
    pub fn bump_generation(&self, tag: &str) {
        *self.generations.entry(tag.to_string()).or_insert(0) += 1;
    }

    /// Sum of the generations of `tags`. Generations never decrease, so the
    /// sum changes iff at least one of them was bumped.
    pub fn generation_sum(&self, tags: &[String]) -> u64 {
        tags.iter()
            .filter_map(|tag| self.generations.get(tag).map(|g| *g))
            .sum()
    }

    /// Snapshot of the keys currently recorded under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tag_to_keys
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the tags currently recorded for `key`.
    pub fn tags_for_key(&self, key: &str) -> Vec<String> {
        self.key_to_tags
            .get(key)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `(tag, key count)` for every tag, sorted by tag.
    pub fn tag_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .tag_to_keys
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();
        counts.sort();
        counts
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub fn indexed_keys(&self) -> Vec<String> {
        self.key_to_tags.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether the two maps mirror each other. Only meaningful when no
    /// writer is active.
    pub fn is_consistent(&self) -> bool {
        let forward = self.key_to_tags.iter().all(|entry| {
            entry.value().iter().all(|tag| {
                self.tag_to_keys
                    .get(tag)
                    .is_some_and(|keys| keys.contains(entry.key()))
            })
        });
        let backward = self.tag_to_keys.iter().all(|entry| {
            !entry.value().is_empty()
                && entry.value().iter().all(|key| {
                    self.key_to_tags
                        .get(key)
                        .is_some_and(|tags| tags.contains(entry.key()))
                })
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_associate_records_both_directions() {
        let index = TagIndex::new();
        index.associate("k1", &tags(&["A", "B"]));
        index.associate("k2", &tags(&["B"]));

        let mut keys = index.keys_for_tag("B");
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);

        let mut k1_tags = index.tags_for_key("k1");
        k1_tags.sort();
        assert_eq!(k1_tags, vec!["A", "B"]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_dissociate_removes_empty_tags() {
        let index = TagIndex::new();
        index.associate("k1", &tags(&["A", "B"]));
        index.associate("k2", &tags(&["B"]));

        let mut removed = index.dissociate("k1");
        removed.sort();
        assert_eq!(removed, vec!["A", "B"]);

        assert!(index.keys_for_tag("A").is_empty());
        assert_eq!(index.keys_for_tag("B"), vec!["k2"]);
        assert_eq!(index.tag_counts(), vec![("B".to_string(), 1)]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_dissociate_unknown_key_is_noop() {
        let index = TagIndex::new();
        assert!(index.dissociate("missing").is_empty());
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_generation_survives_dissociation() {
        let index = TagIndex::new();
        let ab = tags(&["A", "B"]);
        assert_eq!(index.generation_sum(&ab), 0);

        index.associate("k1", &ab);
        index.bump_generation("A");
        index.dissociate("k1");
        index.bump_generation("A");
        index.bump_generation("C");

        assert_eq!(index.generation_sum(&ab), 2);
        assert_eq!(index.generation_sum(&tags(&["B"])), 0);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_empty_tag_list_records_nothing() {
        let index = TagIndex::new();
        index.associate("k1", &[]);
        assert!(index.indexed_keys().is_empty());
    }
}
