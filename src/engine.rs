use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};
use url::Url;

use crate::download::assemble::StreamAssembler;
use crate::download::key::{KeySource, SessionKeyResolver};
use crate::download::playlist::master::best_variant;
use crate::download::playlist::{parse_master, parse_media, Segment, Variant};
use crate::download::progress::Progress;
use crate::download::segment::SegmentDownloader;
use crate::download::{base_url, resolve, Session};
use crate::error::{ExtractError, Result};
use crate::options::Options;

/// Lifecycle of one extraction. `Failed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Initialized,
    MasterParsed,
    VariantSelected,
    MediaParsed,
    Downloading,
    Assembling,
    Complete,
    Failed,
}

/// Turns an HLS playlist URL into a single output file.
///
/// `initialize` loads the master playlist (or the media playlist directly),
/// `select_variant` loads the chosen track and `extract` downloads and
/// assembles its segments.
pub struct ExtractionEngine {
    session: Arc<Session>,
    source: Url,
    preset_key: Option<Bytes>,
    variants: Vec<Variant>,
    selected: Option<usize>,
    segments: Vec<Segment>,
    state: ExtractionState,
    options: Options,
    progress: Progress,
}

impl ExtractionEngine {
    /// Builds the session, resolves a caller supplied key and parses `url`.
    ///
    /// With `media_playlist` set, `url` is parsed as a media playlist and
    /// variant selection is skipped.
    pub async fn initialize(
        url: Url,
        media_playlist: bool,
        key: &KeySource,
        options: &Options,
        progress: Progress,
    ) -> Result<Self> {
        let referer = options
            .referer
            .clone()
            .unwrap_or_else(|| base_url(url.as_str()).to_string());
        debug!(%referer, "referer");

        let session = Arc::new(Session::new(options.cookies.clone(), Some(referer))?);
        let preset_key = SessionKeyResolver::preset_from(&session, key).await?;

        let mut engine = Self {
            session,
            source: url,
            preset_key,
            variants: Vec::new(),
            selected: None,
            segments: Vec::new(),
            state: ExtractionState::Initialized,
            options: options.clone(),
            progress,
        };

        if media_playlist {
            let source = engine.source.clone();
            engine.segments = engine.load_media(&source).await?;
            engine.transition(ExtractionState::MediaParsed);
        } else {
            let playlist = engine.session.get_text(&engine.source).await?;
            engine.variants = parse_master(&playlist)?;
            info!(count = engine.variants.len(), "master playlist parsed");
            engine.transition(ExtractionState::MasterParsed);
        }

        Ok(engine)
    }

    pub fn state(&self) -> ExtractionState {
        self.state
    }

    pub fn list_variants(&self) -> Vec<&str> {
        self.variants
            .iter()
            .map(|variant| variant.label.as_str())
            .collect()
    }

    /// Index of the highest bandwidth variant.
    pub fn best_variant(&self) -> Option<usize> {
        best_variant(&self.variants)
    }

    pub fn selected_variant(&self) -> Option<&Variant> {
        self.selected.map(|index| &self.variants[index])
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Loads the media playlist of variant `index`.
    ///
    /// An out of range index is reported without touching the current
    /// selection; a fetch or parse failure moves the engine to `Failed`.
    pub async fn select_variant(&mut self, index: usize) -> Result<()> {
        match self.state {
            ExtractionState::MasterParsed
            | ExtractionState::VariantSelected
            | ExtractionState::MediaParsed => {}
            state => {
                return Err(ExtractError::InvalidState {
                    operation: "select a variant",
                    state,
                })
            }
        }

        let Some(variant) = self.variants.get(index) else {
            return Err(ExtractError::ResolutionIndex {
                index,
                available: self.variants.len(),
            });
        };
        info!(index, label = %variant.label, "variant selected");

        let url = match resolve(&self.source, &variant.uri) {
            Ok(url) => url,
            Err(err) => return self.fail(err),
        };
        self.transition(ExtractionState::VariantSelected);

        match self.load_media(&url).await {
            Ok(segments) => {
                self.selected = Some(index);
                self.segments = segments;
                self.transition(ExtractionState::MediaParsed);
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Downloads every segment, then writes them in order to `output`.
    pub async fn extract(&mut self, output: &Path) -> Result<()> {
        if self.state != ExtractionState::MediaParsed {
            return Err(ExtractError::InvalidState {
                operation: "extract",
                state: self.state,
            });
        }

        let segments_dir = match &self.options.temp_dir {
            Some(parent) => tempfile::Builder::new()
                .suffix("-segments")
                .tempdir_in(parent)
                .map_err(|err| ExtractError::io(parent, err)),
            None => tempfile::Builder::new()
                .suffix("-segments")
                .tempdir()
                .map_err(|err| ExtractError::io(std::env::temp_dir(), err)),
        };
        let segments_dir = match segments_dir {
            Ok(dir) => dir,
            Err(err) => return self.fail(err),
        };
        debug!(dir = %segments_dir.path().display(), "segments directory");

        self.transition(ExtractionState::Downloading);
        let downloader = SegmentDownloader::new(
            Arc::clone(&self.session),
            self.options.workers,
            segments_dir.path().to_path_buf(),
            self.progress.clone(),
        );
        let urls = self
            .segments
            .iter()
            .map(|segment| segment.uri.clone())
            .collect::<Vec<_>>();
        let report = downloader.download(&urls).await;
        if !report.is_complete() {
            warn!(
                failed = report.failed.len(),
                skip_missing = self.options.skip_missing,
                "assembling with missing segments"
            );
        }

        self.transition(ExtractionState::Assembling);
        let assembler = StreamAssembler::new(
            segments_dir.path().to_path_buf(),
            self.options.skip_missing,
            self.progress.clone(),
        );
        if let Err(err) = assembler.assemble(&self.segments, output).await {
            return self.fail(err);
        }

        self.transition(ExtractionState::Complete);
        Ok(())
    }

    async fn load_media(&self, url: &Url) -> Result<Vec<Segment>> {
        debug!(%url, "loading media playlist");
        let playlist = self.session.get_text(url).await?;
        let mut resolver = SessionKeyResolver::new(Arc::clone(&self.session), self.preset_key.clone());
        let segments = parse_media(&playlist, url, &mut resolver).await?;
        info!(count = segments.len(), "media playlist parsed");
        Ok(segments)
    }

    fn transition(&mut self, next: ExtractionState) {
        debug!(from = ?self.state, to = ?next, "state");
        self.state = next;
    }

    fn fail<T>(&mut self, err: ExtractError) -> Result<T> {
        self.transition(ExtractionState::Failed);
        Err(err)
    }
}
