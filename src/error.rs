pub type ReelforgeResult<T> = Result<T, ReelforgeError>;

#[derive(thiserror::Error, Debug)]
pub enum ReelforgeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("encoder not found: {0}")]
    EncoderNotFound(String),

    #[error("encoder exited with {status}: {stderr}\ncommand: {command}")]
    EncoderFailed {
        status: String,
        command: String,
        stderr: String,
    },

    #[error("image encode error: {0}")]
    ImageEncode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReelforgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unsupported_input(msg: impl Into<String>) -> Self {
        Self::UnsupportedInput(msg.into())
    }

    pub fn encoder_not_found(msg: impl Into<String>) -> Self {
        Self::EncoderNotFound(msg.into())
    }

    pub fn image_encode(msg: impl Into<String>) -> Self {
        Self::ImageEncode(msg.into())
    }
}
