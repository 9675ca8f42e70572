use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed media: {0}")]
    Malformed(String),
}

impl HarvestError {
    pub fn fs(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        HarvestError::Filesystem {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
