//! Bidirectional tag index.
//!
//! Tracks which cache keys carry which tags, so a tag flush can find every
//! entry to evict and an evicted entry can be removed from all its tags.

use std::collections::{HashMap, HashSet};

use super::keys::CacheKey;
use super::tags::TagSet;

/// Tracks tag -> keys and key -> tags mappings.
///
/// Not synchronised on its own; [`super::memory::MemoryBackend`] guards it
/// together with the entries it indexes.
#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: HashMap<String, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, TagSet>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` carries `tags`, replacing any earlier membership.
    pub fn register(&mut self, key: CacheKey, tags: TagSet) {
        self.unregister(&key);
        for tag in tags.iter() {
            self.tag_to_keys
                .entry(tag.to_string())
                .or_default()
                .insert(key.clone());
        }
        self.key_to_tags.insert(key, tags);
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<CacheKey> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> TagSet {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    /// Forget `key` and drop tags left without members.
    pub fn unregister(&mut self, key: &CacheKey) {
        if let Some(tags) = self.key_to_tags.remove(key) {
            for tag in tags.iter() {
                if let Some(keys) = self.tag_to_keys.get_mut(tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.tag_to_keys.remove(tag);
                    }
                }
            }
        }
    }

    /// Remove every key carrying any of `tags` and return them.
    pub fn take_tagged(&mut self, tags: &TagSet) -> HashSet<CacheKey> {
        let mut affected = HashSet::new();
        for tag in tags.iter() {
            if let Some(keys) = self.tag_to_keys.get(tag) {
                affected.extend(keys.iter().cloned());
            }
        }
        for key in &affected {
            self.unregister(key);
        }
        affected
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::keys::generate;

    fn key(id: i64) -> CacheKey {
        generate("shop", "Order.getById", &json!({ "id": id })).expect("key")
    }

    fn tags(names: &[&str]) -> TagSet {
        names.iter().copied().collect()
    }

    #[test]
    fn register_and_lookup() {
        let mut index = TagIndex::new();
        index.register(key(1), tags(&["list.Order", "global"]));

        assert!(index.keys_for_tag("list.Order").contains(&key(1)));
        assert!(index.tags_for_key(&key(1)).contains("global"));
    }

    #[test]
    fn unregister_cleans_up_mappings() {
        let mut index = TagIndex::new();
        index.register(key(1), tags(&["list.Order"]));
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.tag_count(), 1);

        index.unregister(&key(1));
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn re_register_replaces_membership() {
        let mut index = TagIndex::new();
        index.register(key(1), tags(&["old"]));
        index.register(key(1), tags(&["new"]));

        assert!(index.keys_for_tag("old").is_empty());
        assert!(index.keys_for_tag("new").contains(&key(1)));
    }

    #[test]
    fn take_tagged_returns_keys_from_any_tag() {
        let mut index = TagIndex::new();
        index.register(key(1), tags(&["a", "shared"]));
        index.register(key(2), tags(&["b", "shared"]));
        index.register(key(3), tags(&["c"]));

        let affected = index.take_tagged(&tags(&["a", "b"]));
        assert_eq!(affected.len(), 2);
        assert!(index.keys_for_tag("shared").is_empty());
        assert_eq!(index.key_count(), 1);

        assert!(index.take_tagged(&tags(&["a", "b"])).is_empty());
    }

    #[test]
    fn clear_removes_all_mappings() {
        let mut index = TagIndex::new();
        index.register(key(1), tags(&["a"]));
        index.clear();
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }
}
