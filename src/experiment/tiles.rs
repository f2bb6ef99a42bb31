use ndarray::Array2;

use crate::error::{PipelineError, Result};

// Decode a single-plane tile to floats in [0, 1]. Integer pixels are
// divided by their type's maximum.
pub fn decode_tile(bytes: &[u8], location: &str) -> Result<Array2<f32>> {
    let image = image::load_from_memory(bytes).map_err(|source| PipelineError::Tile {
        location: location.to_string(),
        source,
    })?;

    let luma = image.to_luma32f();
    let (width, height) = luma.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), luma.into_raw())
        .map_err(|err| PipelineError::Shape(format!("tile '{}': {}", location, err)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma};
    use std::io::Cursor;

    // Encode a 16-bit grayscale PNG from a row-major buffer.
    pub(crate) fn png16(width: u32, height: u32, values: &[u16]) -> Vec<u8> {
        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(width, height, values.to_vec()).unwrap();
        let mut bytes = Cursor::new(Vec::new());
        buffer.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_u16_normalized() {
        let bytes = png16(3, 2, &[0, 65535, 32768, 1, 2, 3]);
        let tile = decode_tile(&bytes, "t.png").unwrap();
        assert_eq!(tile.dim(), (2, 3));
        assert_eq!(tile[[0, 0]], 0.0);
        assert_eq!(tile[[0, 1]], 1.0);
        assert!((tile[[0, 2]] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_tile(b"not an image", "bad.png"),
            Err(PipelineError::Tile { .. })
        ));
    }
}
