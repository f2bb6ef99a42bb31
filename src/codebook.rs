use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write;

use crate::error::{PipelineError, Result};

#[derive(Deserialize)]
struct CodewordBit {
    r: usize,
    c: usize,
    #[serde(default = "default_bit_value")]
    v: f32,
}

fn default_bit_value() -> f32 {
    1.0
}

#[derive(Deserialize)]
struct CodebookEntryJson {
    codeword: Vec<CodewordBit>,
    target: String,
}

// Current codebooks wrap the entries in a versioned object, older ones are a
// bare list.
#[derive(Deserialize)]
#[serde(untagged)]
enum CodebookJson {
    Versioned {
        #[allow(dead_code)]
        version: Option<String>,
        mappings: Vec<CodebookEntryJson>,
    },
    Bare(Vec<CodebookEntryJson>),
}

// Result of nearest-codeword decoding of a single trace.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MetricDecode {
    pub target: usize,
    pub distance: f32,
    pub magnitude: f32,
    pub passes_thresholds: bool,
}

// Mapping from target name to its expected (round, channel) pattern.
#[derive(Clone, Debug)]
pub struct Codebook {
    targets: Vec<String>,
    target_index: HashMap<String, usize>,

    // [ntargets, nrounds, nchannels]
    patterns: Array3<f32>,

    // per-round "on" channel -> target, for one-hot-per-round entries
    per_round_codes: HashMap<Vec<usize>, usize>,
}

impl Codebook {
    pub fn new(targets: Vec<String>, patterns: Array3<f32>) -> Result<Self> {
        if targets.len() != patterns.len_of(Axis(0)) {
            return Err(PipelineError::Codebook(format!(
                "{} target names for {} patterns",
                targets.len(),
                patterns.len_of(Axis(0))
            )));
        }

        let mut target_index = HashMap::new();
        for (i, target) in targets.iter().enumerate() {
            if target_index.insert(target.clone(), i).is_some() {
                return Err(PipelineError::Codebook(format!(
                    "duplicate target '{}'",
                    target
                )));
            }
        }

        let mut per_round_codes = HashMap::new();
        for (i, pattern) in patterns.outer_iter().enumerate() {
            if let Some(code) = one_hot_code(pattern) {
                per_round_codes.entry(code).or_insert(i);
            }
        }

        Ok(Codebook {
            targets,
            target_index,
            patterns,
            per_round_codes,
        })
    }

    // Parse a codebook document. When `shape` is None the number of rounds
    // and channels is inferred from the largest indices present.
    pub fn from_json(content: &str, shape: Option<(usize, usize)>) -> Result<Self> {
        let parsed: CodebookJson =
            serde_json::from_str(content).map_err(|source| PipelineError::Json {
                location: String::from("codebook"),
                source,
            })?;

        let entries = match parsed {
            CodebookJson::Versioned { mappings, .. } => mappings,
            CodebookJson::Bare(entries) => entries,
        };

        let (nrounds, nchannels) = shape.unwrap_or_else(|| {
            let bits = entries.iter().flat_map(|e| e.codeword.iter());
            bits.fold((0, 0), |(nr, nc), bit| (nr.max(bit.r + 1), nc.max(bit.c + 1)))
        });

        let mut patterns = Array3::zeros((entries.len(), nrounds, nchannels));
        let mut targets = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            for bit in &entry.codeword {
                if bit.r >= nrounds || bit.c >= nchannels {
                    return Err(PipelineError::Codebook(format!(
                        "target '{}' references round {} channel {} outside {}x{}",
                        entry.target, bit.r, bit.c, nrounds, nchannels
                    )));
                }
                patterns[[i, bit.r, bit.c]] = bit.v;
            }
            targets.push(entry.target.clone());
        }

        Codebook::new(targets, patterns)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn nrounds(&self) -> usize {
        self.patterns.len_of(Axis(1))
    }

    pub fn nchannels(&self) -> usize {
        self.patterns.len_of(Axis(2))
    }

    pub fn target_name(&self, i: usize) -> &str {
        &self.targets[i]
    }

    pub fn target_index(&self, target: &str) -> Option<usize> {
        self.target_index.get(target).copied()
    }

    // [round, channel] pattern of a target.
    pub fn get(&self, target: &str) -> Option<ArrayView2<f32>> {
        self.target_index(target)
            .map(|i| self.patterns.index_axis(Axis(0), i))
    }

    pub fn patterns(&self) -> &Array3<f32> {
        &self.patterns
    }

    // Render a target's pattern as a rounds-by-channels grid.
    pub fn format_entry(&self, target: &str) -> Option<String> {
        let pattern = self.get(target)?;
        let mut out = String::new();
        let _ = write!(out, "{:>8}", "");
        for c in 0..self.nchannels() {
            let _ = write!(out, " c{:<3}", c);
        }
        out.push('\n');
        for (r, row) in pattern.outer_iter().enumerate() {
            let _ = write!(out, "{:>8}", format!("r{}", r));
            for v in row.iter() {
                let _ = write!(out, " {:<4}", v);
            }
            out.push('\n');
        }
        Some(out)
    }

    // Decode [features, rounds, channels] intensities by taking the max
    // channel in each round and looking the resulting code up exactly.
    pub fn decode_per_round_max(&self, intensities: &Array3<f32>) -> Result<Vec<Option<usize>>> {
        let (_, nrounds, nchannels) = intensities.dim();
        self.check_shape(nrounds, nchannels)?;

        let decoded = intensities
            .outer_iter()
            .map(|feature| {
                let code: Option<Vec<usize>> = feature
                    .outer_iter()
                    .map(|round| argmax_positive(round))
                    .collect();
                code.and_then(|code| self.per_round_codes.get(&code).copied())
            })
            .collect();

        Ok(decoded)
    }

    // Nearest-codeword decoding of [features, rounds * channels] traces
    // (round-major), after normalizing traces and codewords to unit
    // `norm_order` norm.
    pub fn decode_metric(
        &self,
        traces: ArrayView2<f32>,
        max_distance: f32,
        min_intensity: f32,
        norm_order: i32,
    ) -> Result<Vec<MetricDecode>> {
        let ncodes = self.nrounds() * self.nchannels();
        if traces.len_of(Axis(1)) != ncodes {
            return Err(PipelineError::Shape(format!(
                "traces have {} values, codebook expects {}",
                traces.len_of(Axis(1)),
                ncodes
            )));
        }
        if self.targets.is_empty() {
            return Err(PipelineError::Codebook(String::from("codebook is empty")));
        }

        let mut codewords: Array2<f32> = self
            .patterns
            .to_shape((self.len(), ncodes))
            .map_err(|err| PipelineError::Shape(err.to_string()))?
            .to_owned();
        for mut codeword in codewords.outer_iter_mut() {
            let norm = lp_norm(codeword.view(), norm_order);
            if norm > 0.0 {
                codeword.mapv_inplace(|v| v / norm);
            }
        }

        let rows: Vec<ArrayView1<f32>> = traces.outer_iter().collect();
        let decoded = rows
            .par_iter()
            .map(|trace| {
                let magnitude = lp_norm(trace.view(), norm_order);
                let scale = if magnitude > 0.0 { 1.0 / magnitude } else { 0.0 };

                let mut best = (0, f32::INFINITY);
                for (i, codeword) in codewords.outer_iter().enumerate() {
                    let d2: f32 = trace
                        .iter()
                        .zip(codeword.iter())
                        .map(|(&t, &c)| (t * scale - c).powi(2))
                        .sum();
                    if d2 < best.1 {
                        best = (i, d2);
                    }
                }

                let distance = best.1.sqrt();
                MetricDecode {
                    target: best.0,
                    distance,
                    magnitude,
                    passes_thresholds: distance <= max_distance && magnitude >= min_intensity,
                }
            })
            .collect();

        Ok(decoded)
    }

    fn check_shape(&self, nrounds: usize, nchannels: usize) -> Result<()> {
        if nrounds != self.nrounds() || nchannels != self.nchannels() {
            return Err(PipelineError::Shape(format!(
                "intensities are {}x{} (rounds x channels), codebook is {}x{}",
                nrounds,
                nchannels,
                self.nrounds(),
                self.nchannels()
            )));
        }
        Ok(())
    }
}

// Channel that is "on" in each round, if every round has exactly one.
fn one_hot_code(pattern: ArrayView2<f32>) -> Option<Vec<usize>> {
    pattern
        .outer_iter()
        .map(|round| {
            let mut on = round.iter().enumerate().filter(|(_, &v)| v > 0.0);
            match (on.next(), on.next()) {
                (Some((c, _)), None) => Some(c),
                _ => None,
            }
        })
        .collect()
}

// First index of the maximum, or None if nothing is positive.
fn argmax_positive(values: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v > 0.0 && best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

pub fn lp_norm(values: ArrayView1<f32>, order: i32) -> f32 {
    match order {
        1 => values.iter().map(|v| v.abs()).sum(),
        2 => values.iter().map(|v| v * v).sum::<f32>().sqrt(),
        p => values
            .iter()
            .map(|v| v.abs().powi(p))
            .sum::<f32>()
            .powf(1.0 / p as f32),
    }
}
