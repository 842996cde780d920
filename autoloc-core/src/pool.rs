//! Time-bounded pick buffer
//!
//! Picks are stored as `Arc<Pick>`. Updates use copy-on-write, so arrivals
//! that already hold a snapshot of a pick are not affected. The pool also
//! records which live origin each pick is associated with.

use crate::model::{Origin, OriginId, Pick, PickId};
use autoloc_common::Time;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct PickPool {
    picks: BTreeMap<PickId, Arc<Pick>>,
    association: HashMap<PickId, OriginId>,
}

impl PickPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pick; false if a pick with this id is already pooled
    pub fn insert(&mut self, pick: Pick) -> bool {
        if self.picks.contains_key(&pick.id) {
            return false;
        }
        self.picks.insert(pick.id.clone(), Arc::new(pick));
        true
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Pick>> {
        self.picks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.picks.contains_key(id)
    }

    /// Modify a pooled pick and return the updated snapshot
    pub fn update<F>(&mut self, id: &str, f: F) -> Option<Arc<Pick>>
    where
        F: FnOnce(&mut Pick),
    {
        let entry = self.picks.get_mut(id)?;
        f(Arc::make_mut(entry));
        Some(entry.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pick>> {
        self.picks.values()
    }

    pub fn len(&self) -> usize {
        self.picks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    /// Origin the pick is currently associated with
    pub fn associated_origin(&self, id: &str) -> Option<OriginId> {
        self.association.get(id).copied()
    }

    /// Point the picks of `origin` at it, replacing its previous set
    pub fn associate(&mut self, origin: &Origin) {
        self.association.retain(|_, oid| *oid != origin.id);
        for arr in &origin.arrivals {
            if self.picks.contains_key(&arr.pick.id) {
                self.association.insert(arr.pick.id.clone(), origin.id);
            }
        }
    }

    pub fn clear_association(&mut self, id: &str) {
        self.association.remove(id);
    }

    /// Forget every association to `origin_id`
    pub fn release_origin(&mut self, origin_id: OriginId) {
        self.association.retain(|_, oid| *oid != origin_id);
    }

    /// Remove picks with time before `min_time`; returns how many
    pub fn cleanup(&mut self, min_time: Time) -> usize {
        let before = self.picks.len();
        self.picks.retain(|_, p| p.time >= min_time);
        let picks = &self.picks;
        self.association.retain(|id, _| picks.contains_key(id));
        before - self.picks.len()
    }

    pub fn clear(&mut self) {
        self.picks.clear();
        self.association.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Arrival;

    #[test]
    fn test_duplicate_is_rejected() {
        let mut pool = PickPool::new();
        assert!(pool.insert(Pick::new("p1", "XX", "AAA", 10.0)));
        assert!(!pool.insert(Pick::new("p1", "XX", "AAA", 20.0)));
        assert_eq!(pool.get("p1").unwrap().time, 10.0);
    }

    #[test]
    fn test_update_leaves_snapshots_alone() {
        let mut pool = PickPool::new();
        pool.insert(Pick::new("p1", "XX", "AAA", 10.0));
        let snapshot = pool.get("p1").unwrap().clone();
        let updated = pool.update("p1", |p| p.amp = 42.0).unwrap();
        assert_eq!(updated.amp, 42.0);
        assert_eq!(snapshot.amp, 0.0);
        assert!(pool.update("nope", |p| p.amp = 1.0).is_none());
    }

    #[test]
    fn test_association_follows_origin() {
        let mut pool = PickPool::new();
        pool.insert(Pick::new("p1", "XX", "AAA", 10.0));
        pool.insert(Pick::new("p2", "XX", "BBB", 11.0));

        let mut origin = Origin::new(0.0, 0.0, 10.0, 0.0);
        origin.id = 3;
        origin.add(Arrival::new(pool.get("p1").unwrap().clone(), "P", 0.0));
        origin.add(Arrival::new(pool.get("p2").unwrap().clone(), "P", 0.0));
        pool.associate(&origin);
        assert_eq!(pool.associated_origin("p2"), Some(3));

        origin.arrivals.pop();
        pool.associate(&origin);
        assert_eq!(pool.associated_origin("p1"), Some(3));
        assert_eq!(pool.associated_origin("p2"), None);
    }

    #[test]
    fn test_cleanup_removes_old_picks() {
        let mut pool = PickPool::new();
        pool.insert(Pick::new("old", "XX", "AAA", 10.0));
        pool.insert(Pick::new("new", "XX", "AAA", 100.0));
        assert_eq!(pool.cleanup(50.0), 1);
        assert!(!pool.contains("old"));
        assert!(pool.contains("new"));
    }
}
