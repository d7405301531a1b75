use std::collections::BTreeSet;
use std::time::Duration;

use image::RgbaImage;
use reqwest::blocking::Client;

use crate::error::FetchError;
use crate::transcript::{Comment, EmoticonId};

pub const DEFAULT_EMOTICON_BASE_URL: &str = "https://static-cdn.jtvnw.net/emoticons/v1";

const FETCH_TIMEOUT: Duration = Duration::from_secs(25);

/// Anything that can turn an emoticon id into a decoded image.
pub trait EmoticonSource {
    fn fetch(&self, id: &EmoticonId) -> Result<RgbaImage, FetchError>;
}

/// Distinct emoticon ids referenced anywhere in `comments`, in stable order.
pub fn distinct_emoticon_ids(comments: &[Comment]) -> BTreeSet<EmoticonId> {
    comments
        .iter()
        .flat_map(|comment| comment.fragments.iter())
        .filter_map(|fragment| fragment.emoticon_id().cloned())
        .collect()
}

pub fn emoticon_url(base_url: &str, id: &EmoticonId) -> String {
    format!("{}/{}/1.0", base_url.trim_end_matches('/'), id)
}

/// Fetches `<base>/<id>/1.0` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEmoticonSource {
    http: Client,
    base_url: String,
}

impl HttpEmoticonSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl EmoticonSource for HttpEmoticonSource {
    fn fetch(&self, id: &EmoticonId) -> Result<RgbaImage, FetchError> {
        let url = emoticon_url(&self.base_url, id);
        let http_error = |source| FetchError::Http {
            id: id.to_string(),
            url: url.clone(),
            source,
        };

        let response = self.http.get(&url).send().map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                id: id.to_string(),
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(http_error)?;
        let image = image::load_from_memory(&bytes).map_err(|source| FetchError::Decode {
            id: id.to_string(),
            source,
        })?;

        tracing::debug!(%id, %url, width = image.width(), height = image.height(), "fetched emoticon");
        Ok(image.to_rgba8())
    }
}
