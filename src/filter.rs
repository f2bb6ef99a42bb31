pub mod clip;
pub mod scale;
pub mod tophat;
pub mod unmix;

pub use clip::ClipValueToZero;
pub use scale::ScaleByPercentile;
pub use tophat::WhiteTophat;
pub use unmix::LinearUnmixing;

use crate::error::Result;
use crate::imagestack::ImageStack;

// An image-to-image transformation. Filters never modify their input.
pub trait Filter {
    fn name(&self) -> &'static str;

    fn run(&self, stack: &ImageStack) -> Result<ImageStack>;
}
