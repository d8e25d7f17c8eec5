use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Source Error - {0}")]
    Source(String),

    #[error("Target Error - {0}")]
    Target(String),

    #[error("Transform Error - {0}")]
    Transform(String),

    #[error("WorkerPool Error - {0}")]
    WorkerPool(String),

    #[error("Builder Error - {0}")]
    Builder(String),

    #[error("Cancelled - {0}")]
    Cancelled(String),

    #[error("Error in Shared - {0}")]
    Shared(batchflow_shared::error::Error),
}

impl From<batchflow_shared::error::Error> for Error {
    fn from(value: batchflow_shared::error::Error) -> Self {
        Error::Shared(value)
    }
}
