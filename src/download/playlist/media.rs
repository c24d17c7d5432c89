use bytes::Bytes;
use tracing::{debug, trace};
use url::Url;

use super::attributes::{find, parse_attributes, unquote};
use super::{check_header, Segment};
use crate::download::key::KeyResolver;
use crate::download::resolve;
use crate::error::{ExtractError, Result};

const EXTINF: &str = "#EXTINF";
const KEY: &str = "#EXT-X-KEY:";
const DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";

/// AES block length, the size of the implicit all-zero IV.
const IV_LEN: usize = 16;

/// Key and IV in effect at a point of the media playlist scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionContext {
    pub key: Option<Bytes>,
    pub iv: Option<Bytes>,
}

impl EncryptionContext {
    pub fn reset(&mut self) {
        self.key = None;
        self.iv = None;
    }

    /// Captures the context for a segment; a key without an IV gets a zero IV.
    fn snapshot(&self, uri: Url, ordinal: usize) -> Segment {
        let iv = match (&self.key, &self.iv) {
            (Some(_), None) => Some(Bytes::from(vec![0u8; IV_LEN])),
            (_, iv) => iv.clone(),
        };

        Segment {
            uri,
            key: self.key.clone(),
            iv,
            ordinal,
        }
    }

    /// Applies one `EXT-X-KEY` attribute list.
    async fn apply_key<R: KeyResolver>(
        &mut self,
        list: &str,
        playlist_url: &Url,
        resolver: &mut R,
    ) -> Result<()> {
        let attributes = parse_attributes(list)?;

        let method = find(&attributes, "METHOD")
            .ok_or_else(|| ExtractError::format(format!("EXT-X-KEY without METHOD: {list:?}")))?;
        match method {
            "NONE" => {
                self.reset();
                return Ok(());
            }
            "AES-128" => {}
            other => {
                return Err(ExtractError::format(format!(
                    "unsupported encryption method {other}"
                )))
            }
        }

        let iv = find(&attributes, "IV").map(decode_iv).transpose()?;

        // an inline URI overrides a caller supplied key
        let key = match (find(&attributes, "URI"), resolver.preset()) {
            (Some(uri), _) => {
                let uri = resolve(playlist_url, unquote(uri))?;
                debug!(%uri, "key URI");
                resolver.fetch(&uri).await?
            }
            (None, Some(key)) => key,
            (None, None) => {
                return Err(ExtractError::format(format!(
                    "EXT-X-KEY without URI and no key supplied: {list:?}"
                )))
            }
        };

        self.key = Some(key);
        if iv.is_some() {
            self.iv = iv;
        }
        Ok(())
    }
}

/// Decodes an `IV=0x...` attribute value into raw bytes.
fn decode_iv(value: &str) -> Result<Bytes> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| ExtractError::format(format!("IV {value:?} lacks the 0x prefix")))?;

    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|err| ExtractError::format(format!("invalid IV {value:?}: {err}")))
}

/// Parses a media playlist into its segments, in playlist order.
///
/// Relative segment and key URIs resolve against `playlist_url`. Keys are
/// obtained from `resolver` as `EXT-X-KEY` directives are scanned, so a key
/// fetch failure aborts the parse.
pub async fn parse_media<R: KeyResolver>(
    playlist: &str,
    playlist_url: &Url,
    resolver: &mut R,
) -> Result<Vec<Segment>> {
    check_header(playlist)?;

    let mut segments = Vec::new();
    let mut context = EncryptionContext::default();
    let mut awaiting_uri = false;

    for line in playlist.lines().skip(1) {
        let line = line.trim();

        if line.starts_with(EXTINF) {
            awaiting_uri = true;
        } else if let Some(list) = line.strip_prefix(KEY) {
            context.apply_key(list, playlist_url, resolver).await?;
        } else if line.starts_with(DISCONTINUITY) {
            context.reset();
        } else if line.is_empty() || line.starts_with('#') {
            continue;
        } else if awaiting_uri {
            let uri = resolve(playlist_url, line)?;
            trace!(%uri, ordinal = segments.len(), "segment");
            segments.push(context.snapshot(uri, segments.len()));
            awaiting_uri = false;
        }
    }

    debug!(
        count = segments.len(),
        encrypted = segments.iter().filter(|segment| segment.is_encrypted()).count(),
        "media playlist parsed"
    );

    Ok(segments)
}
