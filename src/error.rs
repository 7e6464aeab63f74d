use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapfError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("malformed {kind} at line {line}: {reason}")]
    Parse {
        kind: &'static str,
        line: usize,
        reason: String,
    },
    #[error("bucket {0} not found in scenario")]
    BucketNotFound(usize),
    #[error("requested {requested} agents but only {available} routes are available")]
    NotEnoughRoutes { requested: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, MapfError>;
