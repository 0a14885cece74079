use crate::geom::coord::LayerPoint;
use crate::geom::segment::Segment;
use rayon::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("{terminals} terminals but no wiring")]
    Unrouted { terminals: usize },

    #[error("terminal {at:?} is not connected to the tree")]
    Open { at: LayerPoint },

    #[error("wiring is split into more than one component near {at:?}")]
    Disjoint { at: LayerPoint },

    #[error("wiring closes a loop at {at:?}")]
    Loop { at: LayerPoint },

    #[error("leg {first:?} -> {second:?} is neither axis-aligned nor a single-layer via")]
    Malformed { first: LayerPoint, second: LayerPoint },
}

/// One net's routed legs and the points it must connect.
pub struct NetRoute<'a> {
    pub name: &'a str,
    pub segments: &'a [Segment<LayerPoint>],
    pub terminals: &'a [LayerPoint],
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[ra] = rb;
        true
    }
}

fn lies_on(seg: &Segment<LayerPoint>, p: &LayerPoint) -> bool {
    if p.layer != seg.first.layer {
        return false;
    }
    let (lo, hi) = (seg.first.point(), seg.second.point());
    p.x >= lo.x.min(hi.x) && p.x <= lo.x.max(hi.x) && p.y >= lo.y.min(hi.y) && p.y <= lo.y.max(hi.y)
}

/// Verifies that `segments` form one acyclic tree touching every terminal.
///
/// Planar legs are split wherever another leg ends on them, and identical
/// pieces count once, so overlapping wires do not read as loops.
pub fn check_tree(segments: &[Segment<LayerPoint>], terminals: &[LayerPoint]) -> Result<(), TreeError> {
    let distinct: BTreeSet<LayerPoint> = terminals.iter().copied().collect();
    if segments.is_empty() {
        return if distinct.len() <= 1 {
            Ok(())
        } else {
            Err(TreeError::Unrouted {
                terminals: distinct.len(),
            })
        };
    }

    let mut points: Vec<LayerPoint> = segments
        .iter()
        .flat_map(|s| [s.first, s.second])
        .chain(distinct.iter().copied())
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut edges: BTreeSet<Segment<LayerPoint>> = BTreeSet::new();
    for seg in segments {
        let malformed = TreeError::Malformed {
            first: seg.first,
            second: seg.second,
        };
        if seg.is_via() {
            if seg.first.point() != seg.second.point() || seg.first.layer.abs_diff(seg.second.layer) != 1 {
                return Err(malformed);
            }
            edges.insert(seg.normalized());
            continue;
        }
        if seg.first == seg.second {
            continue;
        }
        if seg.first.x != seg.second.x && seg.first.y != seg.second.y {
            return Err(malformed);
        }
        let cuts: Vec<LayerPoint> = points.iter().filter(|p| lies_on(seg, p)).copied().collect();
        for w in cuts.windows(2) {
            edges.insert(Segment::new(w[0], w[1]));
        }
    }

    let index = |p: &LayerPoint| points.binary_search(p).unwrap_or(usize::MAX);
    let mut dsu = DisjointSet::new(points.len());
    for e in &edges {
        if !dsu.union(index(&e.first), index(&e.second)) {
            return Err(TreeError::Loop { at: e.first });
        }
    }

    let Some(anchor) = edges.iter().next().map(|e| index(&e.first)) else {
        return if distinct.len() <= 1 {
            Ok(())
        } else {
            Err(TreeError::Unrouted {
                terminals: distinct.len(),
            })
        };
    };
    let root = dsu.find(anchor);
    for e in &edges {
        if dsu.find(index(&e.first)) != root {
            return Err(TreeError::Disjoint { at: e.first });
        }
    }
    for t in &distinct {
        if dsu.find(index(t)) != root {
            return Err(TreeError::Open { at: *t });
        }
    }
    Ok(())
}

/// Checks every net in parallel and returns the failures in input order.
pub fn run(routes: &[NetRoute<'_>]) -> Vec<(String, TreeError)> {
    log::info!("Starting Connectivity Verification ({} nets)", routes.len());
    let failures: Vec<(String, TreeError)> = routes
        .par_iter()
        .filter_map(|r| {
            check_tree(r.segments, r.terminals)
                .err()
                .map(|e| (r.name.to_string(), e))
        })
        .collect();

    if failures.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: every routed net is a connected tree.");
    } else {
        for (name, err) in &failures {
            log::error!("\x1b[31mFAIL\x1b[0m: net '{}': {}", name, err);
        }
    }
    failures
}
