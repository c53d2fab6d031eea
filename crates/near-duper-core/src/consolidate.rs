//! Turns linked groups into disjoint duplicate clusters.
//!
//! The consolidator sees each group id once, in the order the linker workers
//! finish. A group's paths are emitted the first time the group is reached,
//! either as the key of a new cluster or as a match absorbed into an existing
//! one, and never again.

use crate::model::{ContentId, DuplicateCluster};
use crate::store::GroupStore;
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct Consolidator<'a> {
    store: &'a GroupStore,
    /// Emitted group -> key of the cluster that holds its paths.
    done: AHashMap<ContentId, ContentId>,
    clusters: BTreeMap<ContentId, Vec<PathBuf>>,
}

impl<'a> Consolidator<'a> {
    pub fn new(store: &'a GroupStore) -> Self {
        Self {
            store,
            done: AHashMap::new(),
            clusters: BTreeMap::new(),
        }
    }

    pub fn consume(&mut self, id: ContentId) {
        let Some(matches) = self.store.take_matches(&id) else {
            warn!("Group {} missing at consolidation, skipped", id);
            return;
        };

        // A match already emitted elsewhere pulls this group into that cluster.
        // Only groups of this run are ever recorded as done.
        let joined = matches.keys().filter_map(|m| self.done.get(m)).min().copied();
        let mut fresh: Vec<ContentId> = matches
            .into_keys()
            .filter(|m| *m != id && !self.done.contains_key(m))
            .filter(|m| {
                let live = self.store.contains(m);
                if !live {
                    debug!("Match {} of {} is not part of this run", m, id);
                }
                live
            })
            .collect();
        fresh.sort();

        match self.done.get(&id).copied().or(joined) {
            Some(key) => {
                if !self.done.contains_key(&id) {
                    self.emit(id, key);
                }
                for m in fresh {
                    self.emit(m, key);
                }
                self.store.remove(&id);
            }
            None => {
                let own_paths = self.store.with_group(&id, |g| g.duplicates.len()).unwrap_or(0);
                if fresh.is_empty() && own_paths <= 1 {
                    // Left in the store: a later group may still match it.
                    return;
                }
                self.emit(id, id);
                for m in fresh {
                    self.emit(m, id);
                }
                self.store.remove(&id);
            }
        }
    }

    fn emit(&mut self, member: ContentId, key: ContentId) {
        match self.store.paths(&member) {
            Some(paths) => {
                self.done.insert(member, key);
                self.clusters.entry(key).or_default().extend(paths);
            }
            None => warn!("Group {} vanished before it could be emitted", member),
        }
    }

    /// Final clusters: paths sorted and deduplicated, singletons dropped.
    pub fn finish(self) -> Vec<DuplicateCluster> {
        let mut out: Vec<DuplicateCluster> = self
            .clusters
            .into_iter()
            .filter_map(|(key, mut paths)| {
                paths.sort();
                paths.dedup();
                (paths.len() > 1).then_some(DuplicateCluster { key, paths })
            })
            .collect();
        out.sort_by(|a, b| a.paths.cmp(&b.paths));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileRecord, FileType};
    use std::collections::HashSet;

    fn id(n: u8) -> ContentId {
        ContentId([n; 32])
    }

    fn store_with(groups: &[(u8, &[&str])]) -> GroupStore {
        let store = GroupStore::new();
        for (n, paths) in groups {
            for p in *paths {
                store.insert_or_append(
                    FileRecord {
                        path: PathBuf::from(p),
                        size: 1,
                        modified: 0,
                        content_id: id(*n),
                    },
                    FileType::Image,
                );
            }
        }
        store
    }

    fn link(store: &GroupStore, a: u8, b: u8) {
        store.add_matches(&id(a), &[(id(b), 0.9)]);
    }

    fn assert_disjoint(clusters: &[DuplicateCluster]) {
        let mut seen = HashSet::new();
        for c in clusters {
            assert!(c.paths.len() > 1);
            for p in &c.paths {
                assert!(seen.insert(p.clone()), "{} in two clusters", p.display());
            }
        }
    }

    #[test]
    fn test_mutual_match_reported_once() {
        let store = store_with(&[(1, &["/a"]), (2, &["/b"])]);
        link(&store, 1, 2);
        link(&store, 2, 1);
        let mut c = Consolidator::new(&store);
        c.consume(id(1));
        c.consume(id(2));
        let clusters = c.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_identical_content_without_matches() {
        let store = store_with(&[(1, &["/a", "/a-copy"]), (2, &["/lonely"])]);
        let mut c = Consolidator::new(&store);
        c.consume(id(1));
        c.consume(id(2));
        let clusters = c.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].key, id(1));
        assert!(store.contains(&id(2)));
    }

    #[test]
    fn test_late_match_absorbed_into_existing_cluster() {
        // 1~2 and 2~3, but 1 never saw 3
        let store = store_with(&[(1, &["/a"]), (2, &["/b"]), (3, &["/c"]), (4, &["/d"])]);
        link(&store, 1, 2);
        link(&store, 2, 3);
        let mut c = Consolidator::new(&store);
        for n in [1, 2, 3, 4] {
            c.consume(id(n));
        }
        let clusters = c.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].paths.len(), 3);
        assert_disjoint(&clusters);
    }

    #[test]
    fn test_one_sided_match_finds_earlier_singleton() {
        let store = store_with(&[(1, &["/a"]), (2, &["/b"])]);
        link(&store, 2, 1);
        let mut c = Consolidator::new(&store);
        c.consume(id(1));
        c.consume(id(2));
        let clusters = c.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].key, id(2));
    }

    #[test]
    fn test_dense_graph_stays_disjoint_in_any_order() {
        let orders: [[u8; 6]; 3] = [[1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1], [3, 6, 1, 4, 2, 5]];
        for order in orders {
            let store = store_with(&[
                (1, &["/1"]),
                (2, &["/2", "/2b"]),
                (3, &["/3"]),
                (4, &["/4"]),
                (5, &["/5"]),
                (6, &["/6"]),
            ]);
            for (a, b) in [(1, 2), (2, 3), (3, 1), (4, 5), (5, 4), (3, 4)] {
                link(&store, a, b);
            }
            let mut c = Consolidator::new(&store);
            for n in order {
                c.consume(id(n));
            }
            let clusters = c.finish();
            assert_disjoint(&clusters);
            assert_eq!(clusters.len(), 1, "order {:?}", order);
            let total: usize = clusters.iter().map(|c| c.paths.len()).sum();
            assert_eq!(total, 6, "order {:?}", order);
        }
    }

    #[test]
    fn test_shared_match_outside_the_run_does_not_bridge() {
        // 1 and 2 each matched 9 from an earlier run, never each other
        let store = store_with(&[(1, &["/a"]), (2, &["/b"])]);
        link(&store, 1, 9);
        link(&store, 2, 9);
        let mut c = Consolidator::new(&store);
        c.consume(id(1));
        c.consume(id(2));
        assert!(c.finish().is_empty());
        assert!(store.contains(&id(1)));
        assert!(store.contains(&id(2)));
    }

    #[test]
    fn test_outside_match_ignored_next_to_live_one() {
        let store = store_with(&[(1, &["/a"]), (2, &["/b"]), (3, &["/c"])]);
        store.add_matches(&id(1), &[(id(2), 0.9), (id(9), 0.95)]);
        link(&store, 3, 9);
        let mut c = Consolidator::new(&store);
        for n in [1, 2, 3] {
            c.consume(id(n));
        }
        let clusters = c.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_missing_group_is_skipped() {
        let store = store_with(&[(1, &["/a"])]);
        let mut c = Consolidator::new(&store);
        c.consume(id(9));
        assert!(c.finish().is_empty());
    }
}
