use reqwest::blocking::Client;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};

static CLIENT: OnceLock<Client> = OnceLock::new();

// Where a manifest or tile lives: on disk, or behind an http(s) URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Path(PathBuf),
    Url(Url),
}

impl Location {
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s).map_err(|err| PipelineError::Fetch {
                url: s.to_string(),
                message: err.to_string(),
            })?;
            Ok(Location::Url(url))
        } else {
            Ok(Location::Path(PathBuf::from(s)))
        }
    }

    // Resolve `relative` against the directory containing this location.
    // Absolute URLs are taken as they are.
    pub fn join(&self, relative: &str) -> Result<Self> {
        if relative.starts_with("http://") || relative.starts_with("https://") {
            return Location::parse(relative);
        }
        match self {
            Location::Path(path) => {
                let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
                Ok(Location::Path(dir.join(relative)))
            }
            Location::Url(url) => {
                let joined = url.join(relative).map_err(|err| PipelineError::Fetch {
                    url: format!("{} + {}", url, relative),
                    message: err.to_string(),
                })?;
                Ok(Location::Url(joined))
            }
        }
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Location::Path(path) => std::fs::read(path).map_err(|source| PipelineError::Io {
                path: path.clone(),
                source,
            }),
            Location::Url(url) => {
                let fetch_err = |err: reqwest::Error| PipelineError::Fetch {
                    url: url.to_string(),
                    message: err.to_string(),
                };
                let client = CLIENT.get_or_init(Client::new);
                let response = client
                    .get(url.clone())
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(fetch_err)?;
                Ok(response.bytes().map_err(fetch_err)?.to_vec())
            }
        }
    }

    pub fn read_json<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let bytes = self.read_bytes()?;
        serde_json::from_slice(&bytes).map_err(|source| PipelineError::Json {
            location: self.to_string(),
            source,
        })
    }

    pub fn read_string(&self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|err| PipelineError::Manifest(format!(
            "'{}' is not valid UTF-8: {}",
            self, err
        )))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(path) => write!(f, "{}", path.display()),
            Location::Url(url) => write!(f, "{}", url),
        }
    }
}
