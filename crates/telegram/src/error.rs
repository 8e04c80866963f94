use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    /// teloxide pins its own reqwest major, so the builder error is carried as text.
    #[error("failed to build telegram http client: {message}")]
    Client { message: String },

    #[error("invalid webhook url \"{url}\": {message}")]
    InvalidWebhookUrl { url: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
