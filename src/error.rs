use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unable to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    #[error("malformed JSON in '{location}': {source}")]
    Json {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode tile '{location}': {source}")]
    Tile {
        location: String,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid experiment manifest: {0}")]
    Manifest(String),

    #[error("invalid codebook: {0}")]
    Codebook(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("correlation is undefined: {0}")]
    Correlation(String),

    #[error("error writing table '{path}': {message}")]
    Output { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// Wrap any displayable error as an output error for `path`.
pub fn output_err<E: std::fmt::Display>(path: &str) -> impl Fn(E) -> PipelineError + '_ {
    move |err| PipelineError::Output {
        path: path.to_string(),
        message: err.to_string(),
    }
}
