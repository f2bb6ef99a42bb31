use kiddo::{ImmutableKdTree, SquaredEuclidean};

// Spatial index over spot positions. Planar data is indexed on (y, x) only,
// since a constant z coordinate gives the tree nothing to split on.
//
// Blob positions sit on the pixel grid, so many share a row, a column or a
// plane. The immutable tree is balanced over the whole slice at once and
// places repeated axis values without a per-bucket limit.
pub enum SpotIndex {
    Empty,
    Planar(ImmutableKdTree<f32, 2>),
    Volume(ImmutableKdTree<f32, 3>),
}

impl SpotIndex {
    pub fn new(positions: &[[f32; 3]], is_volume: bool) -> Self {
        if positions.is_empty() {
            SpotIndex::Empty
        } else if is_volume {
            SpotIndex::Volume(ImmutableKdTree::new_from_slice(positions))
        } else {
            let planar: Vec<[f32; 2]> = positions.iter().map(|p| [p[1], p[2]]).collect();
            SpotIndex::Planar(ImmutableKdTree::new_from_slice(&planar))
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SpotIndex::Empty => 0,
            SpotIndex::Planar(kdtree) => kdtree.size(),
            SpotIndex::Volume(kdtree) => kdtree.size(),
        }
    }

    // Nearest indexed spot as (index, euclidean distance).
    pub fn nearest(&self, p: &[f32; 3]) -> Option<(usize, f32)> {
        let nn = match self {
            SpotIndex::Empty => return None,
            SpotIndex::Planar(kdtree) => kdtree.nearest_one::<SquaredEuclidean>(&[p[1], p[2]]),
            SpotIndex::Volume(kdtree) => kdtree.nearest_one::<SquaredEuclidean>(p),
        };
        Some((nn.item as usize, nn.distance.sqrt()))
    }

    // Every indexed spot within `radius`, as (index, euclidean distance),
    // ordered by index.
    pub fn within(&self, p: &[f32; 3], radius: f32) -> Vec<(usize, f32)> {
        let r2 = radius * radius;
        let neighbors = match self {
            SpotIndex::Empty => return Vec::new(),
            SpotIndex::Planar(kdtree) => kdtree.within::<SquaredEuclidean>(&[p[1], p[2]], r2),
            SpotIndex::Volume(kdtree) => kdtree.within::<SquaredEuclidean>(p, r2),
        };
        let mut found: Vec<(usize, f32)> = neighbors
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect();
        found.sort_by_key(|&(i, _)| i);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_ignores_z() {
        let positions = vec![[0.0, 1.0, 1.0], [0.0, 10.0, 10.0], [0.0, 3.0, 1.0]];
        let index = SpotIndex::new(&positions, false);
        assert_eq!(index.len(), 3);

        let (i, d) = index.nearest(&[5.0, 2.0, 1.0]).unwrap();
        assert_eq!(i, 0);
        assert!((d - 1.0).abs() < 1e-6);

        let near: Vec<usize> = index.within(&[0.0, 2.0, 1.0], 1.5).iter().map(|n| n.0).collect();
        assert_eq!(near, vec![0, 2]);
    }

    #[test]
    fn test_volume_uses_z() {
        let positions = vec![[0.0, 0.0, 0.0], [4.0, 0.0, 0.0]];
        let index = SpotIndex::new(&positions, true);
        let (i, d) = index.nearest(&[3.0, 0.0, 0.0]).unwrap();
        assert_eq!(i, 1);
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_index() {
        let index = SpotIndex::new(&[], false);
        assert_eq!(index.len(), 0);
        assert!(index.nearest(&[0.0, 0.0, 0.0]).is_none());
        assert!(index.within(&[0.0, 0.0, 0.0], 5.0).is_empty());
    }

    #[test]
    fn test_many_spots_on_one_row() {
        let positions: Vec<[f32; 3]> = (0..40).map(|i| [0.0, 20.0, 12.0 * i as f32]).collect();
        let index = SpotIndex::new(&positions, false);
        assert_eq!(index.len(), 40);
        for (i, p) in positions.iter().enumerate() {
            let (j, d) = index.nearest(&[0.0, 21.0, p[2] + 1.0]).unwrap();
            assert_eq!(j, i);
            assert!((d - 2.0_f32.sqrt()).abs() < 1e-5);
        }
        let near: Vec<usize> = index.within(&[0.0, 20.0, 120.0], 12.5).iter().map(|n| n.0).collect();
        assert_eq!(near, vec![9, 10, 11]);
    }

    #[test]
    fn test_many_spots_in_one_plane() {
        let positions: Vec<[f32; 3]> = (0..48)
            .map(|i| [0.0, 10.0 * (i / 8) as f32, 10.0 * (i % 8) as f32])
            .collect();
        let index = SpotIndex::new(&positions, true);
        assert_eq!(index.len(), 48);
        for (i, p) in positions.iter().enumerate() {
            let (j, d) = index.nearest(&[1.0, p[1], p[2]]).unwrap();
            assert_eq!(j, i);
            assert!((d - 1.0).abs() < 1e-5);
        }
        assert_eq!(index.within(&[0.0, 20.0, 20.0], 10.5).len(), 5);
    }
}
