use tracing::debug;

use super::attributes::{find, parse_attributes};
use super::{check_header, Variant};
use crate::error::{ExtractError, Result};

const STREAM_INF: &str = "#EXT-X-STREAM-INF:";

struct StreamInf {
    bandwidth: Option<String>,
    resolution: Option<String>,
}

impl StreamInf {
    fn parse(list: &str) -> Result<Self> {
        // empty items count, so a trailing comma still makes two
        if list.split(',').count() < 2 {
            return Err(ExtractError::format(format!(
                "stream info needs at least 2 attributes: {list:?}"
            )));
        }

        let attributes = parse_attributes(list)?;
        Ok(Self {
            bandwidth: find(&attributes, "BANDWIDTH").map(str::to_string),
            resolution: find(&attributes, "RESOLUTION").map(str::to_string),
        })
    }

    fn into_variant(self, uri: &str) -> Variant {
        let bandwidth = self.bandwidth.unwrap_or_default();
        let label = match &self.resolution {
            Some(resolution) => format!("[{resolution}] {bandwidth}"),
            None => bandwidth.clone(),
        };

        Variant {
            label,
            uri: uri.to_string(),
            bandwidth: bandwidth.parse().ok(),
            resolution: self.resolution,
        }
    }
}

/// Parses a master playlist into its variants, in the order they are listed.
///
/// A stream info line only produces a variant once the next URI line is seen;
/// stream info without either `BANDWIDTH` or `RESOLUTION` is dropped.
pub fn parse_master(playlist: &str) -> Result<Vec<Variant>> {
    check_header(playlist)?;

    let mut variants = Vec::new();
    let mut pending: Option<StreamInf> = None;

    for line in playlist.lines().skip(1) {
        let line = line.trim();

        if let Some(list) = line.strip_prefix(STREAM_INF) {
            pending = Some(StreamInf::parse(list)?);
        } else if line.is_empty() || line.starts_with('#') {
            continue;
        } else if let Some(info) = pending.take() {
            if info.bandwidth.is_none() && info.resolution.is_none() {
                continue;
            }
            let variant = info.into_variant(line);
            debug!(label = %variant.label, uri = %variant.uri, "variant");
            variants.push(variant);
        }
    }

    Ok(variants)
}

/// Index of the variant with the highest advertised bandwidth.
pub fn best_variant(variants: &[Variant]) -> Option<usize> {
    variants
        .iter()
        .enumerate()
        .max_by_key(|(_, variant)| variant.bandwidth.unwrap_or_default())
        .map(|(index, _)| index)
}
