use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid transcript: {0}")]
    Transcript(#[from] serde_json::Error),

    #[error(transparent)]
    Provider(#[from] crate::tools::ProviderError),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
