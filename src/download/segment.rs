use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use super::progress::{Phase, Progress};
use super::Session;

const JOB_QUEUE_CAPACITY: usize = 100;

/// Temporary file for the segment at `url`: the hex MD5 of the URL inside `dir`.
pub fn temp_path(dir: &Path, url: &Url) -> PathBuf {
    dir.join(hex::encode(Md5::digest(url.as_str().as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: Url,
    pub path: PathBuf,
}

impl DownloadJob {
    pub fn new(url: Url, dir: &Path) -> Self {
        let path = temp_path(dir, &url);
        Self { url, path }
    }
}

/// Outcome of one download batch.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub total: usize,
    /// Segments whose fetch failed; their temporary files do not exist.
    pub failed: Vec<Url>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fixed pool of workers fetching segments into a temporary directory.
pub struct SegmentDownloader {
    session: Arc<Session>,
    workers: usize,
    dir: PathBuf,
    progress: Progress,
}

impl SegmentDownloader {
    pub fn new(session: Arc<Session>, workers: usize, dir: PathBuf, progress: Progress) -> Self {
        Self {
            session,
            workers: workers.max(1),
            dir,
            progress,
        }
    }

    /// Downloads every URL once and waits for all workers to finish.
    ///
    /// A failed segment is logged and counted as done; it never stops the
    /// batch and is listed in the returned report instead.
    pub async fn download(&self, urls: &[Url]) -> DownloadReport {
        let mut seen = HashSet::new();
        let jobs = urls
            .iter()
            .filter(|url| seen.insert(url.as_str().to_owned()))
            .map(|url| DownloadJob::new(url.clone(), &self.dir))
            .collect::<Vec<_>>();
        let total = jobs.len();

        info!(total, workers = self.workers, "downloading segments");

        let (sender, receiver) = flume::bounded::<DownloadJob>(JOB_QUEUE_CAPACITY);
        let done = Arc::new(AtomicUsize::new(0));

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker(
                id,
                receiver.clone(),
                Arc::clone(&self.session),
                Arc::clone(&done),
                total,
                self.progress.clone(),
            ));
        }
        drop(receiver);

        for job in jobs {
            if sender.send_async(job).await.is_err() {
                error!("every download worker stopped, remaining segments are skipped");
                break;
            }
        }
        drop(sender);

        let mut report = DownloadReport {
            total,
            failed: Vec::new(),
        };
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(failed) => report.failed.extend(failed),
                Err(err) => error!("download worker died: {}", err),
            }
        }

        if report.is_complete() {
            info!(total, "all segments downloaded");
        } else {
            warn!(total, failed = report.failed.len(), "some segments could not be downloaded");
        }

        report
    }
}

async fn worker(
    id: usize,
    jobs: flume::Receiver<DownloadJob>,
    session: Arc<Session>,
    done: Arc<AtomicUsize>,
    total: usize,
    progress: Progress,
) -> Vec<Url> {
    let mut failed = Vec::new();

    while let Ok(job) = jobs.recv_async().await {
        debug!(worker = id, url = %job.url, "downloading segment");

        match session.download_to(&job.url, &job.path).await {
            Ok(len) => debug!(worker = id, url = %job.url, len, "segment downloaded"),
            Err(err) => {
                warn!(worker = id, url = %job.url, "segment download failed: {}", err);
                // drop whatever part of the body made it to disk
                let _ = tokio::fs::remove_file(&job.path).await;
                failed.push(job.url.clone());
            }
        }

        let done = done.fetch_add(1, Ordering::SeqCst) + 1;
        progress.emit(Phase::Download, job.url.as_str(), done, total);
    }

    failed
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::download::progress::ProgressEvent;

    #[test]
    fn temp_path_is_stable_per_url() {
        let dir = Path::new("/tmp/segments");
        let a = Url::parse("https://cdn.example.com/a.ts").unwrap();
        let b = Url::parse("https://cdn.example.com/b.ts").unwrap();

        assert_eq!(temp_path(dir, &a), temp_path(dir, &a));
        assert_ne!(temp_path(dir, &a), temp_path(dir, &b));
        assert_eq!(
            temp_path(dir, &a).file_name().unwrap().len(),
            32,
            "hex encoded md5"
        );
    }

    #[tokio::test]
    async fn downloads_all_segments_with_fewer_workers() {
        let server = MockServer::start().await;
        let count = 7;
        let mut urls = Vec::new();
        for index in 0..count {
            Mock::given(method("GET"))
                .and(path(format!("/seg{index}.ts")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![index as u8; 10 + index]))
                .expect(1)
                .mount(&server)
                .await;
            urls.push(Url::parse(&format!("{}/seg{index}.ts", server.uri())).unwrap());
        }

        let dir = tempfile::tempdir().unwrap();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(Vec::new(), None).unwrap());
        let downloader =
            SegmentDownloader::new(session, 3, dir.path().to_path_buf(), Progress::new(sender));

        let report = downloader.download(&urls).await;
        drop(downloader);

        assert!(report.is_complete());
        assert_eq!(report.total, count);

        let mut events: Vec<ProgressEvent> = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }
        let mut done = events.iter().map(|event| event.done).collect::<Vec<_>>();
        done.sort_unstable();
        assert_eq!(done, (1..=count).collect::<Vec<_>>());
        assert!(events
            .iter()
            .all(|event| event.phase == Phase::Download && event.total == count));

        for (index, url) in urls.iter().enumerate() {
            let bytes = std::fs::read(temp_path(dir.path(), url)).unwrap();
            assert_eq!(bytes, vec![index as u8; 10 + index]);
        }
    }

    #[tokio::test]
    async fn failed_segments_do_not_stop_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.ts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ok = Url::parse(&format!("{}/ok.ts", server.uri())).unwrap();
        let broken = Url::parse(&format!("{}/broken.ts", server.uri())).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new(Vec::new(), None).unwrap());
        let downloader =
            SegmentDownloader::new(session, 2, dir.path().to_path_buf(), Progress::default());

        let report = downloader.download(&[broken.clone(), ok.clone()]).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.failed, vec![broken.clone()]);
        assert!(temp_path(dir.path(), &ok).exists());
        assert!(!temp_path(dir.path(), &broken).exists());
    }

    #[tokio::test]
    async fn repeated_urls_are_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/same.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 4]))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/same.ts", server.uri())).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new(Vec::new(), None).unwrap());
        let downloader =
            SegmentDownloader::new(session, 4, dir.path().to_path_buf(), Progress::default());

        let report = downloader.download(&[url.clone(), url.clone()]).await;

        assert_eq!(report.total, 1);
        assert!(report.is_complete());
    }
}
