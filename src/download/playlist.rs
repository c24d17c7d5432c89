pub mod attributes;
pub mod master;
pub mod media;

use bytes::Bytes;
use url::Url;

use crate::error::{ExtractError, Result};

pub use master::parse_master;
pub use media::parse_media;

const HEADER: &str = "#EXTM3U";

/// One selectable track advertised by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// `"[RESOLUTION] BANDWIDTH"`, or just the bandwidth when no resolution is given.
    pub label: String,
    /// Media playlist reference as written in the master playlist.
    pub uri: String,
    pub bandwidth: Option<u64>,
    pub resolution: Option<String>,
}

/// One media segment with the encryption context in effect when it was listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub uri: Url,
    pub key: Option<Bytes>,
    pub iv: Option<Bytes>,
    /// Position in the media playlist, the order of the assembled output.
    pub ordinal: usize,
}

impl Segment {
    pub fn name(&self) -> &str {
        match self.uri.path().rsplit_once('/') {
            Some((_, name)) if !name.is_empty() => name,
            _ => self.uri.path(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}

/// Fails unless the first line of `playlist` is the `#EXTM3U` header.
fn check_header(playlist: &str) -> Result<()> {
    let first = playlist
        .trim_start_matches('\u{feff}')
        .lines()
        .next()
        .unwrap_or_default();

    if first.trim_end().starts_with(HEADER) {
        Ok(())
    } else {
        Err(ExtractError::format("missing #EXTM3U header"))
    }
}
