pub mod fetch;
pub mod manifest;
pub mod tiles;

use indicatif::ProgressBar;
use ndarray::{s, Array5};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::codebook::Codebook;
use crate::error::{PipelineError, Result};
use crate::imagestack::{Coordinates, ImageStack};
pub use fetch::Location;
use manifest::{CollectionManifest, ExperimentManifest, TileSetManifest};
use tiles::decode_tile;

pub const PRIMARY_IMAGE: &str = "primary";

// One field of view: its image types and where their tile sets live.
#[derive(Clone, Debug)]
pub struct FieldOfView {
    name: String,
    images: BTreeMap<String, Location>,
}

impl FieldOfView {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_names(&self) -> Vec<&str> {
        self.images.keys().map(|k| k.as_str()).collect()
    }

    pub fn tileset(&self, image: &str) -> Result<TileSetManifest> {
        self.image_location(image)?.read_json()
    }

    fn image_location(&self, image: &str) -> Result<&Location> {
        self.images.get(image).ok_or_else(|| {
            PipelineError::Manifest(format!(
                "fov '{}' has no image '{}' (has: {})",
                self.name,
                image,
                self.image_names().join(", ")
            ))
        })
    }

    // Read and decode every tile of one image type into a stack.
    pub fn get_image(&self, image: &str, progress: &ProgressBar) -> Result<ImageStack> {
        let location = self.image_location(image)?;
        let tileset: TileSetManifest = location.read_json()?;
        load_tileset(location, &tileset, progress)
    }
}

// A loaded experiment: FOVs by name, the shared codebook and free-form
// metadata.
#[derive(Clone, Debug)]
pub struct Experiment {
    fovs: Vec<FieldOfView>,
    codebook: Codebook,
    extras: serde_json::Value,
}

impl Experiment {
    pub fn from_json(location: &str) -> Result<Self> {
        let location = Location::parse(location)?;
        let manifest: ExperimentManifest = location.read_json()?;

        let mut fovs: BTreeMap<String, BTreeMap<String, Location>> = BTreeMap::new();
        for (image, collection) in manifest.images.iter() {
            let collection_location = location.join(collection)?;
            let collection: CollectionManifest = collection_location.read_json()?;
            for (fov, tileset) in collection.contents.iter() {
                fovs.entry(fov.clone())
                    .or_default()
                    .insert(image.clone(), collection_location.join(tileset)?);
            }
        }
        let fovs: Vec<FieldOfView> = fovs
            .into_iter()
            .map(|(name, images)| FieldOfView { name, images })
            .collect();
        if fovs.is_empty() {
            return Err(PipelineError::Manifest(format!(
                "'{}' lists no fields of view",
                location
            )));
        }

        // size the codebook to the primary image so that channels no target
        // uses still count
        let shape = match fovs[0].images.get(PRIMARY_IMAGE) {
            Some(primary) => {
                let tileset: TileSetManifest = primary.read_json()?;
                let (nrounds, nchannels, _) = tileset.dims();
                Some((nrounds, nchannels))
            }
            None => None,
        };
        let codebook = Codebook::from_json(&location.join(&manifest.codebook)?.read_string()?, shape)?;

        Ok(Experiment {
            fovs,
            codebook,
            extras: manifest.extras,
        })
    }

    pub fn fovs(&self) -> &[FieldOfView] {
        &self.fovs
    }

    pub fn fov_names(&self) -> Vec<&str> {
        self.fovs.iter().map(|f| f.name()).collect()
    }

    // The named FOV, or the first one when no name is given.
    pub fn fov(&self, name: Option<&str>) -> Result<&FieldOfView> {
        match name {
            None => self.fovs.first().ok_or_else(|| {
                PipelineError::Manifest(String::from("experiment has no fields of view"))
            }),
            Some(name) => self.fovs.iter().find(|f| f.name == name).ok_or_else(|| {
                PipelineError::Manifest(format!(
                    "no fov named '{}' (has: {})",
                    name,
                    self.fov_names().join(", ")
                ))
            }),
        }
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    pub fn extras(&self) -> &serde_json::Value {
        &self.extras
    }
}

pub fn load_tileset(
    location: &Location,
    tileset: &TileSetManifest,
    progress: &ProgressBar,
) -> Result<ImageStack> {
    let (nrounds, nchannels, nz) = tileset.dims();

    // every (r, c, z) must be present exactly once
    let mut slots: Vec<Option<usize>> = vec![None; nrounds * nchannels * nz];
    for (i, tile) in tileset.tiles.iter().enumerate() {
        let (r, c, z) = (tile.index("r"), tile.index("c"), tile.index("z"));
        if r >= nrounds || c >= nchannels || z >= nz {
            return Err(PipelineError::Manifest(format!(
                "tile '{}' has index (r={}, c={}, z={}) outside shape {}x{}x{}",
                tile.file, r, c, z, nrounds, nchannels, nz
            )));
        }
        let slot = &mut slots[(r * nchannels + c) * nz + z];
        if slot.replace(i).is_some() {
            return Err(PipelineError::Manifest(format!(
                "more than one tile for (r={}, c={}, z={})",
                r, c, z
            )));
        }
    }
    if let Some(missing) = slots.iter().position(|s| s.is_none()) {
        return Err(PipelineError::Manifest(format!(
            "no tile for (r={}, c={}, z={})",
            missing / (nchannels * nz),
            (missing / nz) % nchannels,
            missing % nz
        )));
    }

    progress.set_length(tileset.tiles.len() as u64);
    let planes = tileset
        .tiles
        .par_iter()
        .map(|tile| {
            let tile_location = location.join(&tile.file)?;
            let plane = decode_tile(&tile_location.read_bytes()?, &tile.file)?;
            progress.inc(1);
            Ok(plane)
        })
        .collect::<Result<Vec<_>>>()?;
    progress.finish_and_clear();

    let (ny, nx) = match planes.first() {
        Some(plane) => plane.dim(),
        None => return Err(PipelineError::Manifest(String::from("tile set has no tiles"))),
    };
    let expected = tileset.default_tile_shape.map(|s| (s.y, s.x));
    for (tile, plane) in tileset.tiles.iter().zip(planes.iter()) {
        let declared = tile.tile_shape.map(|s| (s.y, s.x)).or(expected);
        if plane.dim() != (ny, nx) || declared.is_some_and(|d| d != plane.dim()) {
            return Err(PipelineError::Shape(format!(
                "tile '{}' is {:?}, expected {:?}",
                tile.file,
                plane.dim(),
                declared.unwrap_or((ny, nx))
            )));
        }
    }

    let mut data = Array5::<f32>::zeros((nrounds, nchannels, nz, ny, nx));
    for (tile, plane) in tileset.tiles.iter().zip(planes.iter()) {
        data.slice_mut(s![tile.index("r"), tile.index("c"), tile.index("z"), .., ..])
            .assign(plane);
    }

    Ok(ImageStack::new(data, tileset_coordinates(tileset)?))
}

// Union of the tiles' physical extents.
fn tileset_coordinates(tileset: &TileSetManifest) -> Result<Coordinates> {
    let mut coords: Option<Coordinates> = None;
    for tile in tileset.tiles.iter() {
        let x = tile.coordinates.xc.bounds()?;
        let y = tile.coordinates.yc.bounds()?;
        let z = match &tile.coordinates.zc {
            Some(zc) => zc.bounds()?,
            None => (0.0, 0.0),
        };
        let merge = |a: (f32, f32), b: (f32, f32)| (a.0.min(b.0), a.1.max(b.1));
        coords = Some(match coords {
            None => Coordinates { x, y, z },
            Some(c) => Coordinates {
                x: merge(c.x, x),
                y: merge(c.y, y),
                z: merge(c.z, z),
            },
        });
    }
    coords.ok_or_else(|| PipelineError::Manifest(String::from("tile set has no tiles")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::experiment::tiles::tests::png16;
    use serde_json::json;
    use std::fs;
    use std::path::{Path, PathBuf};

    // Scratch directory unique to one test.
    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("spotdecode-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    // Write a 2 round x 2 channel x 1 z experiment with 4x5 tiles. Pixel
    // (r, c) of tile (y, x) holds (1000 * (r * 2 + c) + y * 5 + x) / 65535.
    pub(crate) fn write_experiment(dir: &Path) -> PathBuf {
        let mut tiles = Vec::new();
        for r in 0..2 {
            for c in 0..2 {
                let file = format!("primary-r{}-c{}.png", r, c);
                let values: Vec<u16> = (0..20).map(|i| (1000 * (r * 2 + c) + i) as u16).collect();
                fs::write(dir.join(&file), png16(5, 4, &values)).unwrap();
                tiles.push(json!({
                    "coordinates": {"xc": [0.0, 0.4], "yc": [10.0, 10.3], "zc": [0.5, 0.5]},
                    "indices": {"r": r, "c": c, "z": 0},
                    "file": file,
                    "tile_shape": {"y": 4, "x": 5},
                }));
            }
        }
        let tileset = json!({
            "version": "0.1.0",
            "dimensions": ["r", "c", "z", "xc", "yc", "zc"],
            "shape": {"r": 2, "c": 2, "z": 1},
            "default_tile_shape": {"y": 4, "x": 5},
            "tiles": tiles,
            "extras": {},
        });
        fs::write(dir.join("primary-fov_000.json"), tileset.to_string()).unwrap();
        fs::write(
            dir.join("primary_image.json"),
            json!({"version": "0.0.0", "contents": {"fov_000": "primary-fov_000.json"}}).to_string(),
        )
        .unwrap();
        fs::write(
            dir.join("codebook.json"),
            json!({
                "version": "0.0.0",
                "mappings": [
                    {"codeword": [{"r": 0, "c": 0, "v": 1}, {"r": 1, "c": 1, "v": 1}], "target": "A"},
                    {"codeword": [{"r": 0, "c": 1, "v": 1}, {"r": 1, "c": 0, "v": 1}], "target": "B"},
                ]
            })
            .to_string(),
        )
        .unwrap();
        let experiment = dir.join("experiment.json");
        fs::write(
            &experiment,
            json!({
                "version": "5.0.0",
                "images": {"primary": "primary_image.json"},
                "codebook": "codebook.json",
                "extras": {"is_space_tx_cool": true},
            })
            .to_string(),
        )
        .unwrap();
        experiment
    }

    #[test]
    fn test_load_experiment() {
        let dir = scratch_dir("load");
        let path = write_experiment(&dir);
        let experiment = Experiment::from_json(path.to_str().unwrap()).unwrap();

        assert_eq!(experiment.fov_names(), vec!["fov_000"]);
        assert_eq!(experiment.codebook().len(), 2);
        assert_eq!(experiment.codebook().nchannels(), 2);
        assert_eq!(experiment.extras()["is_space_tx_cool"], json!(true));

        let fov = experiment.fov(None).unwrap();
        assert_eq!(fov.image_names(), vec![PRIMARY_IMAGE]);
        let stack = fov.get_image(PRIMARY_IMAGE, &ProgressBar::hidden()).unwrap();
        assert_eq!(stack.data().dim(), (2, 2, 1, 4, 5));

        // round 1, channel 0, y 2, x 3
        let expected = (2000 + 13) as f32 / 65535.0;
        assert!((stack.data()[[1, 0, 0, 2, 3]] - expected).abs() < 1e-6);
        assert_eq!(stack.coords().x, (0.0, 0.4));
        assert_eq!(stack.coords().z, (0.5, 0.5));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unknown_fov_and_image() {
        let dir = scratch_dir("unknown");
        let path = write_experiment(&dir);
        let experiment = Experiment::from_json(path.to_str().unwrap()).unwrap();

        assert!(experiment.fov(Some("fov_001")).is_err());
        let fov = experiment.fov(Some("fov_000")).unwrap();
        assert!(fov.get_image("nuclei", &ProgressBar::hidden()).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_tile_is_error() {
        let dir = scratch_dir("missing");
        let path = write_experiment(&dir);
        let experiment = Experiment::from_json(path.to_str().unwrap()).unwrap();
        let fov = experiment.fov(None).unwrap();

        let mut tileset = fov.tileset(PRIMARY_IMAGE).unwrap();
        tileset.tiles.pop();
        let location = Location::Path(dir.join("primary-fov_000.json"));
        let result = load_tileset(&location, &tileset, &ProgressBar::hidden());
        assert!(matches!(result, Err(PipelineError::Manifest(_))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
