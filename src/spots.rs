pub mod blob;
pub mod index;
pub mod intensity_table;
pub mod local_search;
pub mod measure;
pub mod pixel;

pub use blob::BlobDetector;
pub use intensity_table::{DecodedIntensityTable, IntensityTable};
pub use local_search::LocalSearchBlobDetector;
pub use pixel::PixelSpotDecoder;

// A detected spot in pixel coordinates, with physical coordinates filled in
// once the spot is attached to a stack.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Spot {
    pub z: f32,
    pub y: f32,
    pub x: f32,
    pub radius: f32,
    pub zc: f32,
    pub yc: f32,
    pub xc: f32,
}

impl Spot {
    pub fn new(z: f32, y: f32, x: f32, radius: f32) -> Self {
        Spot {
            z,
            y,
            x,
            radius,
            zc: z,
            yc: y,
            xc: x,
        }
    }

    pub fn position(&self) -> [f32; 3] {
        [self.z, self.y, self.x]
    }
}
