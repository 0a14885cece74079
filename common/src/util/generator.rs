use crate::db::core::{ConnectType, LayerDirection, NetlistDB, SpacingRule};
use crate::db::gcell::GCellAxis;
use crate::error::DbError;
use crate::geom::point::Point;
use crate::geom::rect::{LayerRect, Rect};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const PITCH: i32 = 10;
const WIRE_WIDTH: i32 = 4;
const SPACING: i32 = 4;
const GCELL_TRACKS: i32 = 10;

/// Builds a synthetic design: alternating-direction layers starting with a
/// horizontal M1, one via master per cut, and `num_nets` nets of 2 to 5 pins
/// on M1 at distinct track crossings two pitches apart.
pub fn generate_random_design(
    num_nets: usize,
    die_size: i32,
    num_layers: u8,
    seed: u64,
) -> Result<NetlistDB, DbError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let die_size = die_size.max(GCELL_TRACKS * PITCH);
    let die = Rect::from_coords(0, 0, die_size, die_size);
    let mut db = NetlistDB::new(die, GCellAxis::uniform(die, GCELL_TRACKS * PITCH)?);

    let num_layers = num_layers.max(2);
    let mut direction = LayerDirection::Horizontal;
    for l in 0..num_layers {
        db.add_layer(
            &format!("M{}", l + 1),
            direction,
            PITCH,
            WIRE_WIDTH,
            SpacingRule {
                min_spacing: SPACING,
                width_table: vec![(3 * WIRE_WIDTH, 2 * SPACING)],
            },
            (WIRE_WIDTH * WIRE_WIDTH * 2) as i64,
        );
        direction = direction.flip();
    }
    let enclosure = Rect::from_coords(-3, -3, 3, 3);
    let cut = Rect::from_coords(-2, -2, 2, 2);
    for l in 0..num_layers - 1 {
        db.add_via(&format!("V{}{}", l + 1, l + 2), l, enclosure, enclosure, cut);
    }

    let slot = 2 * PITCH;
    let slots_per_side = ((die_size - slot) / slot).max(1);
    let capacity = (slots_per_side * slots_per_side) as usize;
    let mut taken: HashSet<(i32, i32)> = HashSet::new();

    log::info!(
        "Generating Benchmark: {} nets, {} layers, Die: {}x{} (seed {})",
        num_nets,
        num_layers,
        die_size,
        die_size,
        seed
    );

    for n in 0..num_nets {
        let want = if rng.gen_bool(0.7) {
            2
        } else {
            rng.gen_range(3..=5)
        };
        if taken.len() + want > capacity {
            log::warn!("Die is full after {} nets", n);
            break;
        }

        let connect_type = if n == 0 {
            ConnectType::Clock
        } else {
            ConnectType::Signal
        };
        let net = db.add_net(&format!("net{}", n), connect_type);
        db.nets[net.index()].critical = rng.gen_bool(0.05);

        // Pins cluster around a seed slot so nets stay local.
        let (cx, cy) = (rng.gen_range(1..=slots_per_side), rng.gen_range(1..=slots_per_side));
        let radius = rng.gen_range(2..=6);
        let mut placed = 0;
        let mut attempts = 0;
        while placed < want && attempts < 200 {
            attempts += 1;
            let sx = (cx + rng.gen_range(-radius..=radius)).clamp(1, slots_per_side);
            let sy = (cy + rng.gen_range(-radius..=radius)).clamp(1, slots_per_side);
            if !taken.insert((sx, sy)) {
                continue;
            }
            let at = Point::new(sx * slot, sy * slot);
            db.add_pin(
                net,
                &format!("p{}", placed),
                vec![LayerRect::new(0, Rect::around(at, 2, 2))],
            );
            placed += 1;
        }
        if placed == 0 {
            let at = loop {
                let s = (rng.gen_range(1..=slots_per_side), rng.gen_range(1..=slots_per_side));
                if taken.insert(s) {
                    break Point::new(s.0 * slot, s.1 * slot);
                }
            };
            db.add_pin(net, "p0", vec![LayerRect::new(0, Rect::around(at, 2, 2))]);
        }
    }

    db.validate()?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_design() {
        let a = generate_random_design(20, 1000, 4, 7).unwrap();
        let b = generate_random_design(20, 1000, 4, 7).unwrap();
        assert_eq!(a.num_nets(), b.num_nets());
        for (pa, pb) in a.pins.iter().zip(&b.pins) {
            assert_eq!(pa.shapes, pb.shapes);
        }
    }

    #[test]
    fn layers_alternate_and_vias_bridge_them() {
        let db = generate_random_design(5, 500, 3, 1).unwrap();
        assert_eq!(db.num_layers(), 3);
        assert!(db.layers[0].direction.is_horizontal());
        assert!(!db.layers[1].direction.is_horizontal());
        assert_eq!(db.vias.len(), 2);
        assert_eq!(db.vias[1].cut_layer, 1);
    }

    #[test]
    fn pins_never_share_a_slot() {
        let db = generate_random_design(50, 800, 2, 3).unwrap();
        let mut centers: Vec<_> = db.pins.iter().map(|p| p.shapes[0].rect.center()).collect();
        let total = centers.len();
        centers.sort();
        centers.dedup();
        assert_eq!(centers.len(), total);
    }
}
