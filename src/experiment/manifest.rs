use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};

// Top level experiment document.
#[derive(Clone, Debug, Deserialize)]
pub struct ExperimentManifest {
    pub version: String,

    // image name ("primary", "nuclei", ...) -> collection document
    pub images: BTreeMap<String, String>,
    pub codebook: String,

    #[serde(default)]
    pub extras: serde_json::Value,
}

// FOV name -> tile set document, for one image type.
#[derive(Clone, Debug, Deserialize)]
pub struct CollectionManifest {
    #[serde(default)]
    pub version: Option<String>,
    pub contents: BTreeMap<String, String>,
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TileShape {
    pub y: usize,
    pub x: usize,
}

// Either a [min, max] pair or a single value.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum CoordinateValue {
    Range(Vec<f32>),
    Point(f32),
}

impl CoordinateValue {
    pub fn bounds(&self) -> Result<(f32, f32)> {
        match self {
            CoordinateValue::Point(v) => Ok((*v, *v)),
            CoordinateValue::Range(vs) => match vs.as_slice() {
                [v] => Ok((*v, *v)),
                [lo, hi] => Ok((lo.min(*hi), lo.max(*hi))),
                _ => Err(PipelineError::Manifest(format!(
                    "coordinate has {} values, expected 1 or 2",
                    vs.len()
                ))),
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TileCoordinates {
    pub xc: CoordinateValue,
    pub yc: CoordinateValue,
    #[serde(default)]
    pub zc: Option<CoordinateValue>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TileManifest {
    pub coordinates: TileCoordinates,

    // "r", "c", "z" -> index
    pub indices: BTreeMap<String, usize>,
    pub file: String,

    #[serde(default)]
    pub tile_shape: Option<TileShape>,
}

impl TileManifest {
    pub fn index(&self, axis: &str) -> usize {
        self.indices.get(axis).copied().unwrap_or(0)
    }
}

// All tiles of one image type in one FOV.
#[derive(Clone, Debug, Deserialize)]
pub struct TileSetManifest {
    #[serde(default)]
    pub version: Option<String>,

    // "r", "c", "z" -> extent
    pub shape: BTreeMap<String, usize>,

    #[serde(default)]
    pub default_tile_shape: Option<TileShape>,
    pub tiles: Vec<TileManifest>,

    #[serde(default)]
    pub extras: serde_json::Value,
}

impl TileSetManifest {
    pub fn extent(&self, axis: &str) -> usize {
        self.shape.get(axis).copied().unwrap_or(1)
    }

    // (rounds, channels, zplanes)
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.extent("r"), self.extent("c"), self.extent("z"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tileset() {
        let content = r#"{
            "version": "0.1.0",
            "dimensions": ["r", "c", "z", "xc", "yc", "zc"],
            "shape": {"r": 3, "c": 4, "z": 2},
            "default_tile_shape": {"y": 8, "x": 6},
            "tiles": [
                {
                    "coordinates": {"xc": [0.0, 0.5], "yc": [1.0, 1.7], "zc": 0.25},
                    "indices": {"r": 1, "c": 2, "z": 0},
                    "file": "tile-r1-c2-z0.png",
                    "sha256": "abc"
                }
            ],
            "extras": {}
        }"#;
        let tileset: TileSetManifest = serde_json::from_str(content).unwrap();
        assert_eq!(tileset.dims(), (3, 4, 2));
        assert_eq!(tileset.default_tile_shape, Some(TileShape { y: 8, x: 6 }));

        let tile = &tileset.tiles[0];
        assert_eq!(tile.index("c"), 2);
        assert_eq!(tile.coordinates.yc.bounds().unwrap(), (1.0, 1.7));
        assert_eq!(
            tile.coordinates.zc.as_ref().unwrap().bounds().unwrap(),
            (0.25, 0.25)
        );
    }

    #[test]
    fn test_bad_coordinate() {
        let value = CoordinateValue::Range(vec![1.0, 2.0, 3.0]);
        assert!(value.bounds().is_err());
    }
}
