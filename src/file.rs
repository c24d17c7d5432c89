use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info, warn};
use url::Url;

use crate::download::key::KeySource;
use crate::error::{ExtractError, Result};
use crate::extract::{self, Request, Selection};
use crate::options::Options;

#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct DownloadEntity {
    url: String,
    output: PathBuf,
    /// Variant index, the highest bandwidth variant when absent.
    #[serde(default)]
    variant: Option<usize>,
    #[serde(default)]
    media_playlist: bool,
    /// Same forms as the `--key` flag.
    #[serde(default)]
    key: Option<String>,
}

impl DownloadEntity {
    fn request(&self) -> Result<Request> {
        let url = Url::parse(&self.url)
            .map_err(|err| ExtractError::Config(format!("invalid URL {:?}: {err}", self.url)))?;
        let key = match &self.key {
            Some(key) => KeySource::from_arg(key)?,
            None => KeySource::Playlist,
        };

        Ok(Request {
            url,
            output: self.output.clone(),
            key,
            media_playlist: self.media_playlist,
            selection: self.variant.map_or(Selection::Best, Selection::Index),
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn parse_entities(content: &str) -> Result<Vec<DownloadEntity>> {
    serde_json::from_str(content)
        .map_err(|err| ExtractError::Config(format!("invalid batch file: {err}")))
}

/// Extracts every entry of a JSON batch file in turn.
///
/// Entries whose output already exists are skipped; a failing entry is
/// logged and the batch moves on.
pub async fn download_file(file: &Path, options: &Options) -> Result<BatchSummary> {
    let content = std::fs::read_to_string(file).map_err(|err| ExtractError::io(file, err))?;
    let entities = parse_entities(&content)?;
    let mut summary = BatchSummary::default();

    for entity in entities {
        if entity.output.exists() {
            info!(
                output = %entity.output.display(),
                "file already exists, therefore skipping download"
            );
            summary.skipped += 1;
            continue;
        }

        info!(url = %entity.url, output = %entity.output.display(), "extracting");

        let result = match entity.request() {
            Ok(request) => extract::extract(&request, options).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => summary.completed += 1,
            Err(err) => {
                error!(url = %entity.url, "extraction failed: {}", err);
                summary.failed += 1;
            }
        }
    }

    if summary.failed > 0 {
        warn!(?summary, "batch finished with failures");
    } else {
        info!(?summary, "batch finished");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_with_defaults() {
        let entities = parse_entities(
            r#"[
                {"url": "https://cdn.example.com/master.m3u8", "output": "a.mp4", "variant": 2},
                {"url": "https://cdn.example.com/media.m3u8", "output": "b.mp4",
                 "mediaPlaylist": true, "key": "AAECAwQFBgcICQoLDA0ODw=="}
            ]"#,
        )
        .unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].request().unwrap().selection, Selection::Index(2));
        assert!(!entities[0].media_playlist);

        let request = entities[1].request().unwrap();
        assert_eq!(request.selection, Selection::Best);
        assert!(request.media_playlist);
        assert!(matches!(request.key, KeySource::Bytes(ref key) if key.len() == 16));
    }

    #[test]
    fn rejects_malformed_batch_files() {
        assert!(matches!(
            parse_entities(r#"[{"output": "a.mp4"}]"#),
            Err(ExtractError::Config(_))
        ));
    }

    #[tokio::test]
    async fn skips_existing_outputs_and_continues_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("done.mp4");
        std::fs::write(&existing, b"already here").unwrap();
        let batch = dir.path().join("download.json");
        std::fs::write(
            &batch,
            serde_json::json!([
                {"url": "https://cdn.example.com/master.m3u8", "output": existing},
                {"url": "not a url", "output": dir.path().join("bad.mp4")},
            ])
            .to_string(),
        )
        .unwrap();

        let summary = download_file(&batch, &Options::default()).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                completed: 0,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(std::fs::read(&existing).unwrap(), b"already here");
    }
}
