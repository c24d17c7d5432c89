use std::io::Write;
use std::path::PathBuf;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;
use url::Url;

use crate::download::key::KeySource;
use crate::download::progress::{Phase, Progress, ProgressEvent};
use crate::engine::ExtractionEngine;
use crate::error::{ExtractError, Result};
use crate::options::Options;

/// How the variant of a master playlist is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Ask on the terminal.
    Prompt,
    Index(usize),
    /// Highest advertised bandwidth.
    Best,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub output: PathBuf,
    pub key: KeySource,
    /// `url` points at a media playlist rather than a master playlist.
    pub media_playlist: bool,
    pub selection: Selection,
}

/// Runs one extraction from playlist URL to output file, rendering progress bars.
pub async fn extract(request: &Request, options: &Options) -> Result<()> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render_progress(receiver));

    // the engine owns the last sender, the renderer stops once it is dropped
    let result = run(request, options, Progress::new(sender)).await;
    let _ = renderer.await;

    result
}

async fn run(request: &Request, options: &Options, progress: Progress) -> Result<()> {
    let mut engine = ExtractionEngine::initialize(
        request.url.clone(),
        request.media_playlist,
        &request.key,
        options,
        progress,
    )
    .await?;

    if !request.media_playlist {
        let index = match request.selection {
            Selection::Index(index) => index,
            Selection::Best => engine
                .best_variant()
                .ok_or_else(|| ExtractError::format("master playlist lists no variants"))?,
            Selection::Prompt => prompt_variant(&engine.list_variants()).await?,
        };
        engine.select_variant(index).await?;
        if let Some(variant) = engine.selected_variant() {
            info!(label = %variant.label, "downloading variant");
        }
    }

    info!(segments = engine.segment_count(), "download is starting");
    engine.extract(&request.output).await?;
    info!(output = %request.output.display(), "download completed");

    Ok(())
}

async fn prompt_variant(labels: &[&str]) -> Result<usize> {
    if labels.is_empty() {
        return Err(ExtractError::format("master playlist lists no variants"));
    }

    println!("Choose resolution/bandwidth:");
    for (index, label) in labels.iter().enumerate() {
        println!(" {index}) {label}");
    }
    print!("> ");
    std::io::stdout()
        .flush()
        .map_err(|err| ExtractError::io("<stdout>", err))?;

    read_choice(BufReader::new(tokio::io::stdin())).await
}

/// Reads one line holding a variant number.
async fn read_choice<R: AsyncBufRead + Unpin>(mut reader: R) -> Result<usize> {
    let mut answer = String::new();
    reader
        .read_line(&mut answer)
        .await
        .map_err(|err| ExtractError::io("<stdin>", err))?;

    answer
        .trim()
        .parse()
        .map_err(|_| ExtractError::Config(format!("{:?} is not a variant number", answer.trim())))
}

async fn render_progress(mut events: UnboundedReceiver<ProgressEvent>) {
    let bars = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:>12} [{bar:40}] {pos}/{len} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    let mut download: Option<ProgressBar> = None;
    let mut assemble: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        let (slot, prefix) = match event.phase {
            Phase::Download => (&mut download, "Downloading"),
            Phase::Assemble => (&mut assemble, "Decrypting"),
        };
        let bar = slot.get_or_insert_with(|| {
            bars.add(
                ProgressBar::new(event.total as u64)
                    .with_style(style.clone())
                    .with_prefix(prefix),
            )
        });

        // download events race each other, never move the bar backwards
        if event.done as u64 > bar.position() {
            bar.set_position(event.done as u64);
        }
        bar.set_message(event.id);
    }

    for bar in [download, assemble].into_iter().flatten() {
        bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_variant_number() {
        assert_eq!(read_choice(&b" 2\n"[..]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rejects_a_non_number() {
        let err = read_choice(&b"720p\n"[..]).await.unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));
    }

    #[tokio::test]
    async fn empty_variant_list_is_a_format_error() {
        let err = prompt_variant(&[]).await.unwrap_err();
        assert!(matches!(err, ExtractError::Format(_)));
    }
}
