use rt_common::geom::coord::GridCoord;
use rt_common::geom::segment::Segment;
use std::collections::{BTreeMap, BTreeSet};

fn axis_of(a: &GridCoord, b: &GridCoord) -> u8 {
    if a.x != b.x {
        0
    } else if a.y != b.y {
        1
    } else {
        2
    }
}

/// Merges unit GCell edges into maximal straight segments. A run stops at
/// terminals, branch points, leaves, bends and layer changes.
pub fn segments_from_edges(
    edges: &[(GridCoord, GridCoord)],
    terminals: &[GridCoord],
) -> Vec<Segment<GridCoord>> {
    let mut adj: BTreeMap<GridCoord, BTreeSet<GridCoord>> = BTreeMap::new();
    for &(u, v) in edges {
        if u != v {
            adj.entry(u).or_default().insert(v);
            adj.entry(v).or_default().insert(u);
        }
    }

    let terminal_set: BTreeSet<GridCoord> = terminals.iter().copied().collect();
    let is_stop = |u: &GridCoord| -> bool {
        if terminal_set.contains(u) {
            return true;
        }
        match adj.get(u) {
            Some(ns) if ns.len() == 2 => {
                let mut it = ns.iter();
                match (it.next(), it.next()) {
                    (Some(a), Some(b)) => axis_of(u, a) != axis_of(u, b),
                    _ => true,
                }
            }
            _ => true,
        }
    };

    let mut visited: BTreeSet<(GridCoord, GridCoord)> = BTreeSet::new();
    let key = |a: GridCoord, b: GridCoord| if a <= b { (a, b) } else { (b, a) };
    let mut segments = Vec::new();

    for (&start, neighbors) in &adj {
        if !is_stop(&start) {
            continue;
        }
        for &first in neighbors {
            if visited.contains(&key(start, first)) {
                continue;
            }
            visited.insert(key(start, first));
            let mut prev = start;
            let mut curr = first;
            while !is_stop(&curr) {
                let next = adj
                    .get(&curr)
                    .and_then(|ns| ns.iter().find(|&&n| n != prev).copied());
                let Some(next) = next else { break };
                visited.insert(key(curr, next));
                prev = curr;
                curr = next;
            }
            segments.push(Segment::new(start, curr).normalized());
        }
    }
    segments.sort_unstable();
    segments.dedup();
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(x: u32, y: u32, z: u8) -> GridCoord {
        GridCoord::new(x, y, z)
    }

    fn path(points: &[GridCoord]) -> Vec<(GridCoord, GridCoord)> {
        points.windows(2).map(|w| (w[0], w[1])).collect()
    }

    #[test]
    fn straight_runs_merge_and_bends_split() {
        let mut edges = path(&[g(0, 0, 0), g(1, 0, 0), g(2, 0, 0), g(2, 1, 0), g(2, 2, 0)]);
        edges.extend(path(&[g(2, 2, 0), g(2, 2, 1), g(2, 2, 2)]));
        let segs = segments_from_edges(&edges, &[g(0, 0, 0), g(2, 2, 2)]);
        assert_eq!(
            segs,
            vec![
                Segment::new(g(0, 0, 0), g(2, 0, 0)),
                Segment::new(g(2, 0, 0), g(2, 2, 0)),
                Segment::new(g(2, 2, 0), g(2, 2, 2)),
            ]
        );
    }

    #[test]
    fn terminals_split_runs() {
        let edges = path(&[g(0, 0, 0), g(1, 0, 0), g(2, 0, 0)]);
        let segs = segments_from_edges(&edges, &[g(0, 0, 0), g(1, 0, 0), g(2, 0, 0)]);
        assert_eq!(segs.len(), 2);
    }
}
