use crate::db::core::NetlistDB;
use crate::geom::rect::{LayerRect, Rect};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as ImageRect;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    Pin,
    Blockage,
    Wire,
    Via,
    Patch,
}

const LAYER_COLORS: [Rgba<u8>; 6] = [
    // M1: Blue
    Rgba([0, 110, 255, 110]),
    // M2: Red
    Rgba([255, 20, 80, 110]),
    // M3: Green
    Rgba([0, 255, 100, 170]),
    // M4: Gold
    Rgba([255, 215, 0, 170]),
    // M5: Violet
    Rgba([180, 50, 255, 190]),
    // M6: Cyan
    Rgba([0, 240, 255, 190]),
];

/// Renders layer shapes over `die` into a PNG, bottom layer first.
pub fn draw_layout(
    die: Rect,
    shapes: &[(ShapeKind, LayerRect)],
    filename: &Path,
    size: u32,
) -> Result<(), image::ImageError> {
    let size = size.max(16);
    let mut img = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255]));
    if die.width() <= 0 || die.height() <= 0 {
        return img.save(filename);
    }

    let scale_x = size as f64 / die.width() as f64;
    let scale_y = size as f64 / die.height() as f64;
    let map = |r: &Rect| {
        let x = (r.min.x - die.min.x) as f64 * scale_x;
        let y = size as f64 - (r.max.y - die.min.y) as f64 * scale_y;
        let w = (r.width() as f64 * scale_x).max(1.0);
        let h = (r.height() as f64 * scale_y).max(1.0);
        ImageRect::at(x as i32, y as i32).of_size(w as u32, h as u32)
    };

    let mut ordered: Vec<&(ShapeKind, LayerRect)> = shapes.iter().collect();
    ordered.sort_by_key(|(kind, s)| (s.layer, *kind == ShapeKind::Via));

    for (kind, shape) in ordered {
        let rect = map(&shape.rect);
        match kind {
            ShapeKind::Blockage => draw_filled_rect_mut(&mut img, rect, Rgba([70, 70, 80, 255])),
            ShapeKind::Pin => draw_hollow_rect_mut(&mut img, rect, Rgba([255, 255, 255, 255])),
            ShapeKind::Via => draw_filled_rect_mut(&mut img, rect, Rgba([255, 255, 255, 200])),
            ShapeKind::Patch => draw_hollow_rect_mut(&mut img, rect, Rgba([255, 140, 0, 255])),
            ShapeKind::Wire => {
                let idx = (shape.layer as usize).min(LAYER_COLORS.len() - 1);
                draw_filled_rect_mut(&mut img, rect, LAYER_COLORS[idx]);
            }
        }
    }
    img.save(filename)
}

/// Pin shapes and blockages of the input design.
pub fn design_shapes(db: &NetlistDB) -> Vec<(ShapeKind, LayerRect)> {
    db.pins
        .iter()
        .flat_map(|p| p.shapes.iter().map(|s| (ShapeKind::Pin, *s)))
        .chain(db.blockages.iter().map(|b| (ShapeKind::Blockage, *b)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_png_of_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.png");
        let die = Rect::from_coords(0, 0, 100, 100);
        let shapes = [
            (ShapeKind::Wire, LayerRect::new(0, Rect::from_coords(10, 48, 90, 52))),
            (ShapeKind::Via, LayerRect::new(1, Rect::from_coords(47, 47, 53, 53))),
            (ShapeKind::Pin, LayerRect::new(0, Rect::from_coords(8, 46, 12, 54))),
        ];
        draw_layout(die, &shapes, &path, 64).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), 64);
        assert_eq!(img.height(), 64);
    }
}
