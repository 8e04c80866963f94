//! Input resolution: inbound message → [`UploadRequest`], or a [`FormatError`]
//! the sender can act on.

use {async_trait::async_trait, bunnydrop_config::MediaConfig, url::Url};

use crate::error::TransferError;

/// An inbound bot message, reduced to the two shapes the relay understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Free text: a link, or `"<filename> <link>"`.
    TextLink(String),
    /// An uploaded file whose bytes live on the messaging platform.
    MediaAttachment(MediaAttachment),
}

/// Metadata of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    /// Platform handle used to obtain a download URL.
    pub file_id: String,
    /// Stable id, used as a last-resort file name.
    pub unique_id: String,
    /// File name reported by the sender's client, if any.
    pub suggested_name: Option<String>,
    /// Caption typed by the sender; used as the file name when it is one.
    pub caption: Option<String>,
    pub size: Option<u64>,
}

/// Turns a [`MediaAttachment`] into a URL the pipeline can GET.
#[async_trait]
pub trait AttachmentLocator: Send + Sync {
    async fn download_url(&self, attachment: &MediaAttachment) -> Result<Url, TransferError>;
}

/// A validated relay job. Only constructed through [`InputResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    filename: String,
    source: Url,
}

impl UploadRequest {
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }
}

/// What was wrong with the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatIssue {
    #[error("the message is empty")]
    Empty,
    #[error("expected a link, or a file name followed by a link")]
    UnexpectedShape,
    #[error("\"{0}\" is not an http(s) link")]
    InvalidUrl(String),
    #[error("cannot derive a file name from the link")]
    NoFilename,
    #[error("\"{name}\" must end with {expected}")]
    UnsupportedExtension { name: String, expected: String },
    #[error("\"{0}\" is not a valid file name")]
    UnsafeFilename(String),
}

/// Rejected input. Displayed verbatim to the sender, usage example included.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid format: {issue}. Send as: {example}")]
pub struct FormatError {
    pub issue: FormatIssue,
    /// Literal example of the accepted syntax.
    pub example: String,
}

/// Recognized media extensions, lowercase and without the dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRules {
    extensions: Vec<String>,
    default_extension: String,
}

impl MediaRules {
    #[must_use]
    pub fn new<I, S>(extensions: I, default_extension: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let clean = |e: &str| e.trim().trim_start_matches('.').to_ascii_lowercase();
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| clean(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
            default_extension: clean(default_extension),
        }
    }

    #[must_use]
    pub fn is_recognized(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| {
                !stem.is_empty() && self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
            })
    }

    #[must_use]
    pub fn default_extension(&self) -> &str {
        &self.default_extension
    }

    /// `filename.mp4 https://your-link`
    #[must_use]
    pub fn usage_example(&self) -> String {
        format!("filename.{} https://your-link", self.default_extension)
    }

    fn expected(&self) -> String {
        self.extensions
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(" or ")
    }

    fn with_default_extension(&self, name: &str) -> String {
        if self.is_recognized(name) {
            name.to_string()
        } else {
            format!("{name}.{}", self.default_extension)
        }
    }
}

impl Default for MediaRules {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for MediaRules {
    fn from(config: &MediaConfig) -> Self {
        Self::new(&config.extensions, &config.default_extension)
    }
}

/// Parses inbound messages. Pure: no I/O, no state.
#[derive(Debug, Clone, Default)]
pub struct InputResolver {
    rules: MediaRules,
}

impl InputResolver {
    #[must_use]
    pub fn new(rules: MediaRules) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &MediaRules {
        &self.rules
    }

    /// Accepts `"<url>"` or `"<filename> <url>"`.
    pub fn resolve_text(&self, text: &str) -> Result<UploadRequest, FormatError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            [] => Err(self.reject(FormatIssue::Empty)),
            [link] => {
                let source = self.parse_source(link)?;
                let filename = filename_from_url(&source)
                    .map(|name| self.rules.with_default_extension(&name))
                    .ok_or_else(|| self.reject(FormatIssue::NoFilename))?;
                self.build(filename, source)
            },
            [name, link] => {
                let source = self.parse_source(link)?;
                self.build((*name).to_string(), source)
            },
            _ => Err(self.reject(FormatIssue::UnexpectedShape)),
        }
    }

    /// File name for an attachment: the caption if it is a valid media file
    /// name, else the client-reported name, else `<unique_id>.<default ext>`.
    #[must_use]
    pub fn attachment_filename(&self, attachment: &MediaAttachment) -> String {
        let caption = attachment
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|c| self.check_filename(c).is_ok());
        if let Some(caption) = caption {
            return caption.to_string();
        }

        attachment
            .suggested_name
            .as_deref()
            .map(|n| self.rules.with_default_extension(&sanitize(n)))
            .filter(|n| self.check_filename(n).is_ok())
            .unwrap_or_else(|| {
                format!(
                    "{}.{}",
                    sanitize(&attachment.unique_id),
                    self.rules.default_extension
                )
            })
    }

    pub fn resolve_attachment(
        &self,
        attachment: &MediaAttachment,
        source: Url,
    ) -> Result<UploadRequest, FormatError> {
        if !matches!(source.scheme(), "http" | "https") {
            return Err(self.reject(FormatIssue::InvalidUrl(source.scheme().to_string())));
        }
        self.build(self.attachment_filename(attachment), source)
    }

    fn build(&self, filename: String, source: Url) -> Result<UploadRequest, FormatError> {
        self.check_filename(&filename)?;
        Ok(UploadRequest { filename, source })
    }

    fn check_filename(&self, name: &str) -> Result<(), FormatError> {
        let unsafe_name = name.is_empty()
            || name.starts_with('.')
            || name.len() > 255
            || name.chars().any(is_unsafe_char);
        if unsafe_name {
            return Err(self.reject(FormatIssue::UnsafeFilename(name.to_string())));
        }
        if !self.rules.is_recognized(name) {
            return Err(self.reject(FormatIssue::UnsupportedExtension {
                name: name.to_string(),
                expected: self.rules.expected(),
            }));
        }
        Ok(())
    }

    fn parse_source(&self, link: &str) -> Result<Url, FormatError> {
        let invalid = || self.reject(FormatIssue::InvalidUrl(link.to_string()));
        let url = Url::parse(link).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
            return Err(invalid());
        }
        Ok(url)
    }

    fn reject(&self, issue: FormatIssue) -> FormatError {
        FormatError {
            issue,
            example: self.rules.usage_example(),
        }
    }
}

/// Last non-empty path segment, percent-decoded. The query is already
/// separated out by the URL parser.
fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let name = sanitize(&decoded);
    (!name.is_empty()).then_some(name)
}

/// Characters that break a single storage path segment or change meaning
/// once the name is joined into the public URL.
fn is_unsafe_char(c: char) -> bool {
    matches!(c, '/' | '\\' | '#' | '?' | '%') || c.is_control() || c.is_whitespace()
}

/// Replace characters that cannot appear in a single storage path segment.
fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if is_unsafe_char(c) { '_' } else { c })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
