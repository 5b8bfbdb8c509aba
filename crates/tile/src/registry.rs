use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use dashmap::DashMap;
use quadterra_common::{Profile, TileKey};

use crate::model::{RenderModel, SharedModel};

/// Concurrent index of live tiles, keyed by [`TileKey`].
///
/// Entries are weak handles to a tile's render model, so a registry lookup
/// never keeps an evicted tile's data alive. Neighbors find each other here
/// instead of holding references to one another.
#[derive(Debug, Default)]
pub struct LiveTiles {
    tiles: DashMap<TileKey, Weak<RwLock<RenderModel>>>,
    /// Keys of tiles whose east or south neighbor appeared since the last
    /// [`LiveTiles::take_arrivals`].
    arrivals: Mutex<Vec<TileKey>>,
}

impl LiveTiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tile and [`announce`](Self::announce) it.
    pub fn add(&self, key: TileKey, model: &SharedModel, profile: &Profile) {
        self.tiles.insert(key, Arc::downgrade(model));
        self.announce(key, profile);
    }

    /// Queue a tile and its live west and north neighbors for stitching:
    /// their far edges now have a partner, or the partner's data changed.
    pub fn announce(&self, key: TileKey, profile: &Profile) {
        let mut arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);
        arrivals.push(key);
        for (dx, dy) in [(-1, 0), (0, -1)] {
            let neighbor = key.create_neighbor_key(dx, dy, profile);
            if neighbor != key && self.find(&neighbor).is_some() {
                arrivals.push(neighbor);
            }
        }
    }

    /// Remove a tile, but only if the entry still points at `model`; a
    /// replacement tile registered under the same key is left alone.
    pub fn remove(&self, key: &TileKey, model: &SharedModel) -> bool {
        let target = Arc::downgrade(model);
        self.tiles
            .remove_if(key, |_, weak| Weak::ptr_eq(weak, &target))
            .is_some()
    }

    pub fn find(&self, key: &TileKey) -> Option<SharedModel> {
        self.tiles.get(key).and_then(|weak| weak.upgrade())
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.find(key).is_some()
    }

    /// Drain the keys queued for edge stitching, deduplicated.
    pub fn take_arrivals(&self) -> Vec<TileKey> {
        let mut arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys = std::mem::take(&mut *arrivals);
        drop(arrivals);
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> SharedModel {
        Arc::new(RwLock::new(RenderModel::new()))
    }

    fn profile() -> Profile {
        Profile::square(1.0).unwrap()
    }

    #[test]
    fn lookups_do_not_keep_tiles_alive() {
        let reg = LiveTiles::new();
        let key = TileKey::new(1, 0, 0);
        let m = model();
        reg.add(key, &m, &profile());
        assert!(reg.contains(&key));
        drop(m);
        assert!(reg.find(&key).is_none());
    }

    #[test]
    fn remove_ignores_replacement() {
        let reg = LiveTiles::new();
        let key = TileKey::new(1, 1, 0);
        let (old, new) = (model(), model());
        reg.add(key, &old, &profile());
        reg.add(key, &new, &profile());
        assert!(!reg.remove(&key, &old));
        assert!(reg.contains(&key));
        assert!(reg.remove(&key, &new));
        assert!(reg.is_empty());
    }

    #[test]
    fn arrival_queues_west_and_north_neighbors() {
        let reg = LiveTiles::new();
        let p = profile();
        let (west, north, tile) = (model(), model(), model());
        reg.add(TileKey::new(2, 0, 1), &west, &p);
        reg.add(TileKey::new(2, 1, 0), &north, &p);
        reg.take_arrivals();

        reg.add(TileKey::new(2, 1, 1), &tile, &p);
        let arrivals = reg.take_arrivals();
        assert_eq!(
            arrivals,
            vec![TileKey::new(2, 0, 1), TileKey::new(2, 1, 0), TileKey::new(2, 1, 1)]
        );
        assert!(reg.take_arrivals().is_empty());
    }
}
