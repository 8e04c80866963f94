use crate::resolver::FormatError;

/// Which half of the relay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Upload,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// A classified transfer failure. The detail is safe to show to the sender:
/// it never contains the source URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("download failed: {detail}")]
    Fetch { detail: String },

    #[error("upload failed: {detail}")]
    Upload { detail: String },
}

impl TransferError {
    #[must_use]
    pub fn fetch(detail: impl Into<String>) -> Self {
        Self::Fetch {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn upload(detail: impl Into<String>) -> Self {
        Self::Upload {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch { .. } => Stage::Fetch,
            Self::Upload { .. } => Stage::Upload,
        }
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Fetch { detail } | Self::Upload { detail } => detail,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("invalid destination: {message}")]
    InvalidDestination { message: String },

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_destination(message: impl std::fmt::Display) -> Self {
        Self::InvalidDestination {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Render an error and its source chain as `outer: inner: root`.
pub(crate) fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = inner.source();
    }
    out
}
