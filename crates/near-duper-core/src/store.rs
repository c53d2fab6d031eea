use crate::model::{ContentId, FileRecord, FileType};
use crate::signature::Signature;
use ahash::AHashMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;

/// Candidate duplicate group: every path seen with one content id.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: ContentId,
    pub file_type: FileType,
    pub size: u64,
    pub modified: i64,
    pub duplicates: Vec<PathBuf>,
    pub signature: Option<Signature>,
    pub corrupt: bool,
    /// Linked groups and their scores. Filled by the linker, drained by the
    /// consolidator.
    pub matches: AHashMap<ContentId, f64>,
    /// Audio only: fingerprints a fixed-stride pass produces for this content.
    pub fingerprint_count: usize,
}

impl Group {
    fn new(record: FileRecord, file_type: FileType) -> Self {
        Self {
            id: record.content_id,
            file_type,
            size: record.size,
            modified: record.modified,
            duplicates: vec![record.path],
            signature: None,
            corrupt: false,
            matches: AHashMap::new(),
            fingerprint_count: 0,
        }
    }
}

/// Concurrent map of the groups of one search run.
#[derive(Default)]
pub struct GroupStore {
    groups: DashMap<ContentId, Group>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.groups.contains_key(id)
    }

    /// Creates the group for `record`'s content id, or appends its path when
    /// the group already exists. Returns `true` for the creating caller only.
    pub fn insert_or_append(&self, record: FileRecord, file_type: FileType) -> bool {
        match self.groups.entry(record.content_id) {
            Entry::Occupied(mut e) => {
                e.get_mut().duplicates.push(record.path);
                false
            }
            Entry::Vacant(e) => {
                e.insert(Group::new(record, file_type));
                true
            }
        }
    }

    pub fn set_signature(&self, id: &ContentId, signature: Signature) {
        if let Some(mut g) = self.groups.get_mut(id) {
            g.signature = Some(signature);
        }
    }

    pub fn set_fingerprint_count(&self, id: &ContentId, count: usize) {
        if let Some(mut g) = self.groups.get_mut(id) {
            g.fingerprint_count = count;
        }
    }

    pub fn mark_corrupt(&self, id: &ContentId) {
        if let Some(mut g) = self.groups.get_mut(id) {
            g.corrupt = true;
        }
    }

    /// Merge `matches` into the group. Existing scores are only raised.
    pub fn add_matches(&self, id: &ContentId, matches: &[(ContentId, f64)]) {
        if let Some(mut g) = self.groups.get_mut(id) {
            for &(other, score) in matches {
                let slot = g.matches.entry(other).or_insert(score);
                if score > *slot {
                    *slot = score;
                }
            }
        }
    }

    /// Empties the group's matches and hands them over.
    pub fn take_matches(&self, id: &ContentId) -> Option<AHashMap<ContentId, f64>> {
        self.groups
            .get_mut(id)
            .map(|mut g| std::mem::take(&mut g.matches))
    }

    pub fn paths(&self, id: &ContentId) -> Option<Vec<PathBuf>> {
        self.groups.get(id).map(|g| g.duplicates.clone())
    }

    pub fn with_group<R>(&self, id: &ContentId, f: impl FnOnce(&Group) -> R) -> Option<R> {
        self.groups.get(id).map(|g| f(g.value()))
    }

    pub fn remove(&self, id: &ContentId) -> Option<Group> {
        self.groups.remove(id).map(|(_, g)| g)
    }

    /// Drops corrupt groups, returning how many went.
    pub fn purge_corrupt(&self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, g| !g.corrupt);
        before - self.groups.len()
    }

    /// Ids of the live groups in a stable order.
    pub fn ids(&self) -> Vec<ContentId> {
        let mut ids: Vec<ContentId> = self.groups.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}
