use super::rect::{LayerRect, Rect};
use rstar::{AABB, RTree};

/// Layer-aware bounding-box index. The layer is the third envelope axis so a
/// query never crosses layers.
pub struct SpatialIndex<T> {
    tree: RTree<IndexedRect<T>>,
}

pub struct IndexedRect<T> {
    pub shape: LayerRect,
    pub data: T,
}

impl<T> rstar::RTreeObject for IndexedRect<T> {
    type Envelope = AABB<[i32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        let r = &self.shape.rect;
        let z = self.shape.layer as i32;
        AABB::from_corners([r.min.x, r.min.y, z], [r.max.x, r.max.y, z])
    }
}

impl<T> SpatialIndex<T> {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn bulk_load(items: Vec<(LayerRect, T)>) -> Self {
        let objects = items
            .into_iter()
            .map(|(shape, data)| IndexedRect { shape, data })
            .collect();
        Self {
            tree: RTree::bulk_load(objects),
        }
    }

    pub fn insert(&mut self, shape: LayerRect, data: T) {
        self.tree.insert(IndexedRect { shape, data });
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Every entry on `layer` whose closed box touches `rect`.
    pub fn query(&self, layer: u8, rect: Rect) -> impl Iterator<Item = &IndexedRect<T>> {
        let z = layer as i32;
        let aabb = AABB::from_corners([rect.min.x, rect.min.y, z], [rect.max.x, rect.max.y, z]);
        self.tree.locate_in_envelope_intersecting(&aabb)
    }
}

impl<T> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_layer_scoped() {
        let mut index = SpatialIndex::new();
        index.insert(LayerRect::new(0, Rect::from_coords(0, 0, 10, 10)), 1usize);
        index.insert(LayerRect::new(1, Rect::from_coords(0, 0, 10, 10)), 2usize);
        index.insert(LayerRect::new(0, Rect::from_coords(50, 50, 60, 60)), 3usize);

        let hits: Vec<usize> = index
            .query(0, Rect::from_coords(5, 5, 6, 6))
            .map(|e| e.data)
            .collect();
        assert_eq!(hits, vec![1]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn bulk_load_and_touching_query() {
        let index = SpatialIndex::bulk_load(vec![
            (LayerRect::new(2, Rect::from_coords(0, 0, 4, 4)), 'a'),
            (LayerRect::new(2, Rect::from_coords(4, 0, 8, 4)), 'b'),
        ]);
        let mut hits: Vec<char> = index
            .query(2, Rect::from_coords(4, 2, 4, 2))
            .map(|e| e.data)
            .collect();
        hits.sort();
        assert_eq!(hits, vec!['a', 'b']);
    }
}
