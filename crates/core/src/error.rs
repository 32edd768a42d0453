use thiserror::Error;

#[derive(Error, Debug)]
pub enum LakeError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Config(String),
}
