use ndarray::{s, Array2, Array5, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::error::{PipelineError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axes {
    Round,
    Ch,
    Zplane,
    Y,
    X,
}

impl Axes {
    pub fn index(&self) -> usize {
        match self {
            Axes::Round => 0,
            Axes::Ch => 1,
            Axes::Zplane => 2,
            Axes::Y => 3,
            Axes::X => 4,
        }
    }
}

// Physical extent of the stack along each spatial axis, as the coordinates
// of the first and last pixel centers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Coordinates {
    pub x: (f32, f32),
    pub y: (f32, f32),
    pub z: (f32, f32),
}

impl Coordinates {
    // Pixel-unit coordinates for a stack of the given spatial shape.
    pub fn pixels(nz: usize, ny: usize, nx: usize) -> Self {
        let last = |n: usize| n.saturating_sub(1) as f32;
        Coordinates {
            x: (0.0, last(nx)),
            y: (0.0, last(ny)),
            z: (0.0, last(nz)),
        }
    }

    pub fn range(&self, axis: Axes) -> (f32, f32) {
        match axis {
            Axes::X => self.x,
            Axes::Y => self.y,
            Axes::Zplane => self.z,
            _ => panic!("{:?} is not a spatial axis", axis),
        }
    }
}

// Evenly spaced coordinate of pixel `i` of `n` spanning `range`.
pub fn tick(range: (f32, f32), n: usize, i: usize) -> f32 {
    if n <= 1 {
        return range.0;
    }
    range.0 + (range.1 - range.0) * (i as f32) / ((n - 1) as f32)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackShape {
    pub nrounds: usize,
    pub nchannels: usize,
    pub nz: usize,
    pub ny: usize,
    pub nx: usize,
}

// A (round, channel, z, y, x) stack of float intensities.
#[derive(Clone, Debug)]
pub struct ImageStack {
    data: Array5<f32>,
    coords: Coordinates,
}

impl ImageStack {
    pub fn new(data: Array5<f32>, coords: Coordinates) -> Self {
        ImageStack { data, coords }
    }

    pub fn from_data(data: Array5<f32>) -> Self {
        let (_, _, nz, ny, nx) = data.dim();
        let coords = Coordinates::pixels(nz, ny, nx);
        ImageStack { data, coords }
    }

    pub fn data(&self) -> &Array5<f32> {
        &self.data
    }

    pub fn coords(&self) -> &Coordinates {
        &self.coords
    }

    pub fn shape(&self) -> StackShape {
        let (nrounds, nchannels, nz, ny, nx) = self.data.dim();
        StackShape {
            nrounds,
            nchannels,
            nz,
            ny,
            nx,
        }
    }

    pub fn nrounds(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn nchannels(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn is_volume(&self) -> bool {
        self.data.len_of(Axis(2)) > 1
    }

    pub fn volume(&self, round: usize, ch: usize) -> ArrayView3<f32> {
        self.data.slice(s![round, ch, .., .., ..])
    }

    pub fn plane(&self, round: usize, ch: usize, z: usize) -> ArrayView2<f32> {
        self.data.slice(s![round, ch, z, .., ..])
    }

    // Physical coordinate of every pixel along a spatial axis.
    pub fn physical_ticks(&self, axis: Axes) -> Vec<f32> {
        let n = self.data.len_of(Axis(axis.index()));
        let range = self.coords.range(axis);
        (0..n).map(|i| tick(range, n, i)).collect()
    }

    // Maximum-intensity projection over the given axes. Projected axes are
    // kept with length 1 so the stack stays 5-D.
    pub fn max_proj(&self, axes: &[Axes]) -> ImageStack {
        let mut data = self.data.clone();
        for axis in axes {
            let ax = Axis(axis.index());
            data = data
                .fold_axis(ax, f32::NEG_INFINITY, |&acc, &v| acc.max(v))
                .insert_axis(ax);
        }

        let mut coords = self.coords;
        if axes.contains(&Axes::Zplane) {
            coords.z = (coords.z.0, coords.z.0);
        }

        ImageStack { data, coords }
    }

    // Keep pixels y >= y_min and x >= x_min, as a new stack.
    pub fn crop(&self, y_min: usize, x_min: usize) -> Result<ImageStack> {
        let shape = self.shape();
        self.sel((y_min, shape.ny), (x_min, shape.nx))
    }

    // Select half-open pixel ranges along y and x.
    pub fn sel(&self, y: (usize, usize), x: (usize, usize)) -> Result<ImageStack> {
        let shape = self.shape();
        if y.0 >= y.1 || y.1 > shape.ny {
            return Err(PipelineError::Shape(format!(
                "y range {}..{} is empty or outside extent {}",
                y.0, y.1, shape.ny
            )));
        }
        if x.0 >= x.1 || x.1 > shape.nx {
            return Err(PipelineError::Shape(format!(
                "x range {}..{} is empty or outside extent {}",
                x.0, x.1, shape.nx
            )));
        }

        let data = self
            .data
            .slice(s![.., .., .., y.0..y.1, x.0..x.1])
            .to_owned();

        let mut coords = self.coords;
        coords.y = (
            tick(self.coords.y, shape.ny, y.0),
            tick(self.coords.y, shape.ny, y.1 - 1),
        );
        coords.x = (
            tick(self.coords.x, shape.nx, x.0),
            tick(self.coords.x, shape.nx, x.1 - 1),
        );

        Ok(ImageStack { data, coords })
    }

    // Apply `f` to every (round, channel, z) plane in parallel. `f` must
    // preserve the plane's shape.
    pub fn map_planes<F>(&self, f: F) -> ImageStack
    where
        F: Fn(ArrayView2<f32>) -> Array2<f32> + Sync,
    {
        let (nr, nc, nz, _, _) = self.data.dim();
        let planes: Vec<Array2<f32>> = (0..nr * nc * nz)
            .into_par_iter()
            .map(|i| {
                let (r, c, z) = (i / (nc * nz), (i / nz) % nc, i % nz);
                f(self.plane(r, c, z))
            })
            .collect();

        let mut data = Array5::zeros(self.data.raw_dim());
        for (i, plane) in planes.into_iter().enumerate() {
            let (r, c, z) = (i / (nc * nz), (i / nz) % nc, i % nz);
            data.slice_mut(s![r, c, z, .., ..]).assign(&plane);
        }

        ImageStack {
            data,
            coords: self.coords,
        }
    }

    pub fn map_data<F>(&self, f: F) -> ImageStack
    where
        F: FnOnce(&Array5<f32>) -> Array5<f32>,
    {
        let data = f(&self.data);
        assert_eq!(data.dim(), self.data.dim());
        ImageStack {
            data,
            coords: self.coords,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp_stack(shape: (usize, usize, usize, usize, usize)) -> ImageStack {
        let n = shape.0 * shape.1 * shape.2 * shape.3 * shape.4;
        let data = Array::from_iter((0..n).map(|v| v as f32))
            .into_shape_with_order(shape)
            .unwrap();
        ImageStack::from_data(data)
    }

    #[test]
    fn test_max_proj_collapses_z() {
        let stack = ramp_stack((2, 3, 4, 5, 6));
        let projected = stack.max_proj(&[Axes::Zplane]);
        let shape = projected.shape();
        assert_eq!((shape.nrounds, shape.nchannels, shape.nz), (2, 3, 1));
        assert_eq!((shape.ny, shape.nx), (5, 6));

        // the ramp increases with z, so the last plane is the max
        assert_eq!(projected.plane(1, 2, 0), stack.plane(1, 2, 3));
        assert!(!projected.is_volume());
    }

    #[test]
    fn test_crop_reduces_extent_by_margin() {
        let stack = ramp_stack((1, 2, 1, 130, 70));
        let cropped = stack.crop(100, 50).unwrap();
        let shape = cropped.shape();
        assert_eq!(shape.ny, 130 - 100);
        assert_eq!(shape.nx, 70 - 50);
        assert_eq!(cropped.data()[[0, 1, 0, 0, 0]], stack.data()[[0, 1, 0, 100, 50]]);
    }

    #[test]
    fn test_crop_past_extent_fails() {
        let stack = ramp_stack((1, 1, 1, 100, 60));
        assert!(stack.crop(100, 0).is_err());
        assert!(stack.crop(0, 61).is_err());
        assert!(stack.crop(99, 59).is_ok());
    }

    #[test]
    fn test_crop_updates_physical_coordinates() {
        let data = Array5::zeros((1, 1, 1, 11, 21));
        let coords = Coordinates {
            x: (0.0, 2.0),
            y: (10.0, 20.0),
            z: (0.0, 0.0),
        };
        let stack = ImageStack::new(data, coords);
        let cropped = stack.crop(5, 10).unwrap();
        assert_eq!(cropped.coords().y, (15.0, 20.0));
        assert_eq!(cropped.coords().x, (1.0, 2.0));

        let ticks = cropped.physical_ticks(Axes::Y);
        assert_eq!(ticks.len(), 6);
        assert_eq!(ticks[0], 15.0);
        assert_eq!(ticks[5], 20.0);
    }

    #[test]
    fn test_map_planes_preserves_order() {
        let stack = ramp_stack((2, 2, 3, 4, 4));
        let doubled = stack.map_planes(|plane| plane.mapv(|v| v * 2.0));
        for ((i, &a), &b) in stack.data().indexed_iter().zip(doubled.data().iter()) {
            assert_eq!(a * 2.0, b, "mismatch at {:?}", i);
        }
    }
}
