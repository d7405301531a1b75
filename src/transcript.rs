use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::ParseError;

/// Author color used when a comment has none or it cannot be parsed.
pub const DEFAULT_AUTHOR_COLOR: [u8; 4] = [128, 0, 128, 255];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmoticonId(String);

impl EmoticonId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmoticonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One indivisible piece of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// `label` is the text chat shows when the image is unavailable.
    Emoticon { id: EmoticonId, label: String },
}

impl Fragment {
    pub fn emoticon_id(&self) -> Option<&EmoticonId> {
        match self {
            Self::Emoticon { id, .. } => Some(id),
            Self::Text(_) => None,
        }
    }
}

/// Author color as given by the transcript. Resolution never fails.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorColor(Option<String>);

impl AuthorColor {
    pub fn new(raw: Option<String>) -> Self {
        Self(raw.filter(|value| !value.trim().is_empty()))
    }

    pub fn raw(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn rgba(&self) -> [u8; 4] {
        self.0
            .as_deref()
            .and_then(parse_hex_color)
            .unwrap_or(DEFAULT_AUTHOR_COLOR)
    }
}

/// Accepts `#RGB`, `#RRGGBB` and `#RRGGBBAA`; the `#` is optional.
pub fn parse_hex_color(raw: &str) -> Option<[u8; 4]> {
    let hex = raw.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }

    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    match hex.len() {
        3 => {
            let mut rgba = [0, 0, 0, 255];
            for (idx, slot) in rgba.iter_mut().take(3).enumerate() {
                let nibble = channel(idx..idx + 1)?;
                *slot = nibble * 17;
            }
            Some(rgba)
        }
        6 => Some([channel(0..2)?, channel(2..4)?, channel(4..6)?, 255]),
        8 => Some([channel(0..2)?, channel(2..4)?, channel(4..6)?, channel(6..8)?]),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub display_time: f64,
    pub author_name: String,
    pub author_color: AuthorColor,
    pub fragments: Vec<Fragment>,
}

impl Comment {
    pub fn new(display_time: f64, author_name: impl Into<String>, fragments: Vec<Fragment>) -> Self {
        Self {
            display_time,
            author_name: author_name.into(),
            author_color: AuthorColor::default(),
            fragments,
        }
    }

    pub fn with_color(mut self, raw: impl Into<String>) -> Self {
        self.author_color = AuthorColor::new(Some(raw.into()));
        self
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptRecord {
    #[serde(default)]
    message_body: String,
    #[serde(default)]
    message_user_color: Option<String>,
    content_offset_seconds: f64,
    #[serde(default)]
    commenter_display_name: String,
    #[serde(default)]
    message_fragments: String,
}

#[derive(Debug, Deserialize)]
struct RawFragment {
    #[serde(default)]
    text: String,
    #[serde(default)]
    emoticon: Option<RawEmoticon>,
}

#[derive(Debug, Deserialize)]
struct RawEmoticon {
    #[serde(default)]
    emoticon_id: String,
}

impl From<RawFragment> for Fragment {
    fn from(raw: RawFragment) -> Self {
        match raw.emoticon {
            Some(emoticon) if !emoticon.emoticon_id.is_empty() => Fragment::Emoticon {
                id: EmoticonId::new(emoticon.emoticon_id),
                label: raw.text,
            },
            _ => Fragment::Text(raw.text),
        }
    }
}

pub fn load_transcript(path: &Path, start: f64, end: f64) -> Result<Vec<Comment>, ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let comments = read_transcript(file, start, end)?;
    tracing::info!(
        path = %path.display(),
        comments = comments.len(),
        start,
        end,
        "loaded transcript"
    );
    Ok(comments)
}

/// Reads CSV records, keeps those with `start <= offset <= end`, and returns
/// them ordered by display time (stable for equal times).
pub fn read_transcript<R: Read>(reader: R, start: f64, end: f64) -> Result<Vec<Comment>, ParseError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut comments = Vec::new();
    for (index, record) in csv_reader.deserialize::<TranscriptRecord>().enumerate() {
        // Header is line 1.
        let row = index + 2;
        let record = record.map_err(|source| ParseError::Record { source })?;

        let offset = record.content_offset_seconds;
        if !offset.is_finite() {
            return Err(ParseError::Offset { row, value: offset });
        }
        if offset < start || offset > end {
            continue;
        }

        let fragments = parse_fragments(&record.message_fragments, &record.message_body)
            .map_err(|source| ParseError::Fragments { row, source })?;

        comments.push(Comment {
            display_time: offset,
            author_name: record.commenter_display_name,
            author_color: AuthorColor::new(record.message_user_color),
            fragments,
        });
    }

    comments.sort_by(|a, b| a.display_time.total_cmp(&b.display_time));
    Ok(comments)
}

fn parse_fragments(raw: &str, body: &str) -> Result<Vec<Fragment>, serde_json::Error> {
    if raw.trim().is_empty() {
        if body.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![Fragment::Text(body.to_owned())]);
    }
    let parsed: Vec<RawFragment> = serde_json::from_str(raw)?;
    Ok(parsed.into_iter().map(Fragment::from).collect())
}
