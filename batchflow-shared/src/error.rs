use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Key Error - {0}")]
    Key(String),

    #[error("Criteria Error - {0}")]
    Criteria(String),
}
