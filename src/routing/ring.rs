//! Consistent hashing ring.
//!
//! # Responsibilities
//! - Place each routable backend at `vnodes` points on a 64-bit circle
//! - Map a key hash to the first point clockwise
//! - Walk further clockwise for failover candidates
//!
//! # Design Decisions
//! - Only routable backends are on the ring; health changes add or remove
//!   exactly that backend's points (O(vnodes · log n), never a full rebuild)
//! - Point positions depend only on backend id and vnode index, so the same
//!   healthy set always yields the same ring
//! - FNV-1a followed by a 64-bit finaliser; FNV alone clusters similar ids

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;

use crate::load_balancer::backend::{Backend, BackendId};

/// Hash arbitrary bytes onto the ring.
pub fn ring_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    mix64(hasher.finish())
}

/// SplitMix64 finaliser.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn point_hash(id: &BackendId, vnode: usize) -> u64 {
    ring_hash(format!("{}#{}", id, vnode).as_bytes())
}

/// The affinity table.
#[derive(Debug)]
pub struct HashRing {
    vnodes: usize,
    points: BTreeMap<u64, BackendId>,
    members: HashMap<BackendId, Arc<Backend>>,
    generation: u64,
}

impl HashRing {
    pub fn new(vnodes: usize) -> Self {
        Self {
            vnodes: vnodes.max(1),
            points: BTreeMap::new(),
            members: HashMap::new(),
            generation: 0,
        }
    }

    /// Number of backends on the ring.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Incremented on every membership change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.members.contains_key(id)
    }

    pub fn member(&self, id: &BackendId) -> Option<&Arc<Backend>> {
        self.members.get(id)
    }

    /// Add a backend's points. Replaces an existing member with the same id.
    pub fn insert(&mut self, backend: Arc<Backend>) {
        let id = backend.id.clone();
        if self.members.insert(id.clone(), backend).is_none() {
            for vnode in 0..self.vnodes {
                // On a 64-bit collision the earlier owner keeps the point.
                self.points.entry(point_hash(&id, vnode)).or_insert_with(|| id.clone());
            }
        }
        self.generation += 1;
    }

    /// Remove a backend's points. Returns false if it was not on the ring.
    pub fn remove(&mut self, id: &BackendId) -> bool {
        if self.members.remove(id).is_none() {
            return false;
        }
        for vnode in 0..self.vnodes {
            let hash = point_hash(id, vnode);
            if self.points.get(&hash) == Some(id) {
                self.points.remove(&hash);
            }
        }
        self.generation += 1;
        true
    }

    /// Owner of `key_hash`: the first point at or after it, wrapping around.
    pub fn lookup(&self, key_hash: u64) -> Option<&Arc<Backend>> {
        self.clockwise(key_hash).next()
    }

    /// Up to `n` distinct backends in clockwise order from `key_hash`.
    pub fn successors(&self, key_hash: u64, n: usize) -> Vec<Arc<Backend>> {
        let mut out: Vec<Arc<Backend>> = Vec::with_capacity(n.min(self.members.len()));
        for backend in self.clockwise(key_hash) {
            if out.len() >= n {
                break;
            }
            if !out.iter().any(|b| b.id == backend.id) {
                out.push(backend.clone());
            }
            if out.len() == self.members.len() {
                break;
            }
        }
        out
    }

    /// First backend clockwise from `key_hash` that is not in `excluded`.
    pub fn lookup_excluding(&self, key_hash: u64, excluded: &[BackendId]) -> Option<&Arc<Backend>> {
        if excluded.iter().filter(|id| self.members.contains_key(*id)).count() >= self.members.len() {
            return None;
        }
        self.clockwise(key_hash).find(|b| !excluded.contains(&b.id))
    }

    fn clockwise(&self, key_hash: u64) -> impl Iterator<Item = &Arc<Backend>> + '_ {
        self.points
            .range(key_hash..)
            .chain(self.points.range(..key_hash))
            .filter_map(move |(_, id)| self.members.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::HealthState;

    fn backend(id: &str, port: u16) -> Arc<Backend> {
        Arc::new(Backend::new(
            id.into(),
            format!("127.0.0.1:{}", port).parse().unwrap(),
            HealthState::Healthy,
        ))
    }

    fn ring_of(k: usize) -> HashRing {
        let mut ring = HashRing::new(160);
        for i in 0..k {
            ring.insert(backend(&format!("backend-{}", i), 9000 + i as u16));
        }
        ring
    }

    fn owners(ring: &HashRing, keys: usize) -> Vec<BackendId> {
        (0..keys)
            .map(|k| ring.lookup(ring_hash(format!("client-{}", k).as_bytes())).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::new(16);
        assert!(ring.lookup(42).is_none());
        assert!(ring.successors(42, 3).is_empty());
    }

    #[test]
    fn lookup_is_deterministic() {
        let a = ring_of(5);
        let b = ring_of(5);
        assert_eq!(owners(&a, 1000), owners(&a, 1000));
        assert_eq!(owners(&a, 1000), owners(&b, 1000));
    }

    #[test]
    fn adding_a_backend_moves_only_its_share() {
        let k = 10;
        let keys = 20_000;
        let mut ring = ring_of(k);
        let before = owners(&ring, keys);

        ring.insert(backend("backend-new", 9999));
        let after = owners(&ring, keys);

        let moved: Vec<_> = before.iter().zip(&after).filter(|(b, a)| b != a).collect();
        // Every moved key now belongs to the newcomer.
        assert!(moved.iter().all(|(_, a)| a.as_str() == "backend-new"));
        // Expected share is 1/(k+1) ≈ 9%; allow generous slack for vnode variance.
        let fraction = moved.len() as f64 / keys as f64;
        assert!(fraction > 0.03 && fraction < 0.2, "moved fraction {}", fraction);
    }

    #[test]
    fn removing_a_backend_moves_only_its_keys() {
        let k = 10;
        let keys = 20_000;
        let mut ring = ring_of(k);
        let before = owners(&ring, keys);

        let victim = BackendId::new("backend-3");
        assert!(ring.remove(&victim));
        let after = owners(&ring, keys);

        for (b, a) in before.iter().zip(&after) {
            if b != &victim {
                assert_eq!(b, a, "key owned by a surviving backend moved");
            } else {
                assert_ne!(a, &victim);
            }
        }
        let moved = before.iter().filter(|b| **b == victim).count();
        let fraction = moved as f64 / keys as f64;
        assert!(fraction < 2.0 / k as f64, "moved fraction {}", fraction);
    }

    #[test]
    fn remove_then_insert_restores_mapping() {
        let mut ring = ring_of(4);
        let before = owners(&ring, 2000);
        let b = ring.members.get(&BackendId::new("backend-1")).unwrap().clone();
        ring.remove(&b.id);
        ring.insert(b);
        assert_eq!(owners(&ring, 2000), before);
    }

    #[test]
    fn successors_are_distinct_and_start_with_owner() {
        let ring = ring_of(4);
        let hash = ring_hash(b"some-client");
        let succ = ring.successors(hash, 10);
        assert_eq!(succ.len(), 4);
        assert_eq!(succ[0].id, ring.lookup(hash).unwrap().id);
        for (i, a) in succ.iter().enumerate() {
            assert!(succ[i + 1..].iter().all(|b| b.id != a.id));
        }
    }

    #[test]
    fn excluding_skips_to_next_clockwise() {
        let ring = ring_of(3);
        let hash = ring_hash(b"another-client");
        let succ = ring.successors(hash, 3);

        let next = ring.lookup_excluding(hash, &[succ[0].id.clone()]).unwrap();
        assert_eq!(next.id, succ[1].id);

        let all: Vec<_> = succ.iter().map(|b| b.id.clone()).collect();
        assert!(ring.lookup_excluding(hash, &all).is_none());
    }

    #[test]
    fn generation_tracks_changes() {
        let mut ring = HashRing::new(8);
        assert_eq!(ring.generation(), 0);
        ring.insert(backend("a", 1));
        assert!(!ring.remove(&BackendId::new("missing")));
        assert_eq!(ring.generation(), 1);
        ring.remove(&BackendId::new("a"));
        assert_eq!(ring.generation(), 2);
        assert!(ring.is_empty());
    }
}
