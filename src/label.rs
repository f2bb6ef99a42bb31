use ndarray::{Array3, ArrayView3};
use petgraph::unionfind::UnionFind;

// Neighbors count as adjacent when they differ by one in at most this many
// coordinates: 1 for faces only, 2 adds edges (8 neighbors in a plane, 18 in
// a volume), 3 is the full 3x3x3 block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Connectivity(pub usize);

impl Connectivity {
    // Offsets to neighbors that precede a voxel in raster order. Scanning
    // only these is enough to visit every adjacent pair once.
    fn backward_offsets(&self) -> Vec<[isize; 3]> {
        let mut offsets = Vec::new();
        for dz in -1..=1_isize {
            for dy in -1..=1_isize {
                for dx in -1..=1_isize {
                    let o = [dz, dy, dx];
                    if o >= [0, 0, 0] {
                        continue;
                    }
                    let nonzero = o.iter().filter(|&&d| d != 0).count();
                    if nonzero <= self.0 {
                        offsets.push(o);
                    }
                }
            }
        }
        offsets
    }
}

// Label connected regions of equal, nonzero value. Labels start at 1 and
// are assigned in raster order of each region's first voxel; background
// stays 0. Returns the label image and the number of labels.
pub fn label_regions(values: ArrayView3<u32>, connectivity: Connectivity) -> (Array3<u32>, usize) {
    let (nz, ny, nx) = values.dim();
    let n = nz * ny * nx;
    let flat = |z: usize, y: usize, x: usize| (z * ny + y) * nx + x;

    let offsets = connectivity.backward_offsets();
    let mut sets = UnionFind::<usize>::new(n);
    for ((z, y, x), &v) in values.indexed_iter() {
        if v == 0 {
            continue;
        }
        for o in offsets.iter() {
            let (zo, yo, xo) = (z as isize + o[0], y as isize + o[1], x as isize + o[2]);
            if zo < 0 || yo < 0 || xo < 0 || yo >= ny as isize || xo >= nx as isize {
                continue;
            }
            let (zo, yo, xo) = (zo as usize, yo as usize, xo as usize);
            if values[[zo, yo, xo]] == v {
                sets.union(flat(z, y, x), flat(zo, yo, xo));
            }
        }
    }

    let mut root_label = vec![0_u32; n];
    let mut nlabels = 0;
    let mut labels = Array3::<u32>::zeros((nz, ny, nx));
    for ((z, y, x), &v) in values.indexed_iter() {
        if v == 0 {
            continue;
        }
        let root = sets.find_mut(flat(z, y, x));
        if root_label[root] == 0 {
            nlabels += 1;
            root_label[root] = nlabels as u32;
        }
        labels[[z, y, x]] = root_label[root];
    }

    (labels, nlabels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_offsets() {
        assert_eq!(Connectivity(1).backward_offsets().len(), 3);
        assert_eq!(Connectivity(2).backward_offsets().len(), 9);
        assert_eq!(Connectivity(3).backward_offsets().len(), 13);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let values = array![[[1, 0, 0], [0, 1, 0], [0, 0, 2]]];
        let (labels, n) = label_regions(values.view(), Connectivity(3));
        assert_eq!(n, 2);
        assert_eq!(labels, array![[[1_u32, 0, 0], [0, 1, 0], [0, 0, 2]]]);

        let (labels, n) = label_regions(values.view(), Connectivity(1));
        assert_eq!(n, 3);
        assert_eq!(labels, array![[[1_u32, 0, 0], [0, 2, 0], [0, 0, 3]]]);
    }

    #[test]
    fn test_different_values_not_merged() {
        let values = array![[[1, 1, 2, 2], [0, 0, 0, 1]]];
        let (labels, n) = label_regions(values.view(), Connectivity(3));
        assert_eq!(n, 3);
        assert_eq!(labels, array![[[1_u32, 1, 2, 2], [0, 0, 0, 3]]]);
    }

    #[test]
    fn test_raster_order_labels() {
        // the region touching (0, 0, 3) first gets label 1 even though it
        // extends further down than the one at (0, 1, 0)
        let values = array![[[0, 0, 0, 5], [5, 0, 0, 5], [0, 0, 5, 5]]];
        let (labels, n) = label_regions(values.view(), Connectivity(3));
        assert_eq!(n, 2);
        assert_eq!(labels[[0, 0, 3]], 1);
        assert_eq!(labels[[0, 2, 2]], 1);
        assert_eq!(labels[[0, 1, 0]], 2);
    }

    #[test]
    fn test_across_planes() {
        let values = array![[[3, 0], [0, 0]], [[0, 0], [0, 3]]];
        let (_, n) = label_regions(values.view(), Connectivity(3));
        assert_eq!(n, 1);
        let (_, n) = label_regions(values.view(), Connectivity(1));
        assert_eq!(n, 2);
    }

    #[test]
    fn test_edge_connectivity() {
        // corner-only neighbors across planes stay apart
        let values = array![[[3, 0], [0, 0]], [[0, 0], [0, 3]]];
        let (_, n) = label_regions(values.view(), Connectivity(2));
        assert_eq!(n, 2);

        // edge neighbors across planes merge
        let values = array![[[3, 0], [0, 0]], [[0, 3], [0, 0]]];
        let (labels, n) = label_regions(values.view(), Connectivity(2));
        assert_eq!(n, 1);
        assert_eq!(labels[[1, 0, 1]], 1);

        // in a plane, edges include diagonals
        let values = array![[[1, 0, 0], [0, 1, 0], [0, 0, 1]]];
        let (_, n) = label_regions(values.view(), Connectivity(2));
        assert_eq!(n, 1);
    }
}
