use crate::key::KeyId;
use smallvec::SmallVec;

/// Resolved tag set, kept sorted by key with at most one value per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a tag set from pairs that are already sorted by key and free of duplicate keys.
    pub fn from_sorted_iter(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }

    /// Builds a tag set from arbitrary pairs. The first value seen for a key wins.
    pub fn from_unsorted(pairs: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = pairs.into_iter().collect();
        tags.sort_by_key(|(k, _)| *k);
        tags.dedup_by(|later, earlier| later.0 == earlier.0);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.tags.partition_point(|(k, _)| *k < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// True when every `(key, value)` pair of `selector` is present in this set.
    pub fn matches(&self, selector: &TagSet) -> bool {
        selector.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}
