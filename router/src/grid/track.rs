use dashmap::DashMap;
use rt_common::db::indices::NetId;
use serde::Serialize;

/// A track coordinate on a layer. `horizontal` tracks are y coordinates
/// carrying east-west wires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackKey {
    pub layer: u8,
    pub horizontal: bool,
    pub coord: i32,
}

/// Half-open interval `[lo, hi)` of a track held by a net.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Claim {
    pub net: NetId,
    pub lo: i32,
    pub hi: i32,
}

impl Claim {
    fn overlaps(&self, lo: i32, hi: i32) -> bool {
        self.lo < hi && lo < self.hi
    }
}

/// Track claims keyed per coordinate. Each claim check and insert happens
/// under that coordinate's entry lock.
#[derive(Clone, Default)]
pub struct TrackOccupancy {
    claims: DashMap<TrackKey, Vec<Claim>>,
}

impl TrackOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `[lo, hi)` for `net` unless another net already holds an
    /// overlapping interval.
    pub fn try_claim(&self, key: TrackKey, net: NetId, lo: i32, hi: i32) -> bool {
        let mut entry = self.claims.entry(key).or_default();
        if entry.iter().any(|c| c.net != net && c.overlaps(lo, hi)) {
            return false;
        }
        entry.push(Claim { net, lo, hi });
        true
    }

    /// Number of other nets' claims on `key` overlapping `[lo, hi)`.
    pub fn load(&self, key: TrackKey, net: NetId, lo: i32, hi: i32) -> usize {
        self.claims
            .get(&key)
            .map(|v| v.iter().filter(|c| c.net != net && c.overlaps(lo, hi)).count())
            .unwrap_or(0)
    }

    /// Drops exactly the listed claims of `net`.
    pub fn release(&self, net: NetId, claims: &[(TrackKey, i32, i32)]) {
        for &(key, lo, hi) in claims {
            if let Some(mut v) = self.claims.get_mut(&key) {
                if let Some(pos) = v
                    .iter()
                    .position(|c| c.net == net && c.lo == lo && c.hi == hi)
                {
                    v.remove(pos);
                }
            }
        }
    }

    pub fn total_claims(&self) -> usize {
        self.claims.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: TrackKey = TrackKey {
        layer: 1,
        horizontal: true,
        coord: 50,
    };

    #[test]
    fn overlapping_claims_of_other_nets_are_refused() {
        let occ = TrackOccupancy::new();
        assert!(occ.try_claim(KEY, NetId(0), 0, 100));
        assert!(!occ.try_claim(KEY, NetId(1), 99, 150));
        assert!(occ.try_claim(KEY, NetId(1), 100, 150));
        assert!(occ.try_claim(KEY, NetId(0), 50, 90));
        assert!(!occ.try_claim(KEY, NetId(0), 50, 120));
        assert_eq!(occ.load(KEY, NetId(2), 0, 200), 3);
        assert_eq!(occ.load(KEY, NetId(2), 140, 160), 1);
        assert_eq!(occ.load(KEY, NetId(1), 140, 160), 0);
    }

    #[test]
    fn release_restores_exact_state() {
        let occ = TrackOccupancy::new();
        occ.try_claim(KEY, NetId(3), 0, 10);
        occ.try_claim(KEY, NetId(4), 20, 30);
        occ.release(NetId(3), &[(KEY, 0, 10)]);
        assert_eq!(occ.total_claims(), 1);
        assert_eq!(occ.load(KEY, NetId(5), 0, 15), 0);
        assert!(occ.try_claim(KEY, NetId(5), 0, 15));
        assert!(!occ.try_claim(KEY, NetId(5), 25, 40));
    }

    #[test]
    fn snapshot_is_independent() {
        let occ = TrackOccupancy::new();
        occ.try_claim(KEY, NetId(0), 0, 10);
        let local = occ.clone();
        local.release(NetId(0), &[(KEY, 0, 10)]);
        assert_eq!(occ.total_claims(), 1);
        assert_eq!(local.total_claims(), 0);
    }
}
