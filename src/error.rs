use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    #[error("join target collection not declared")]
    MissingJoinTarget,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
