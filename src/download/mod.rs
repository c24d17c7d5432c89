pub mod assemble;
pub mod key;
pub mod playlist;
pub mod progress;
pub mod segment;

use std::path::Path;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use reqwest::Response;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::cookies::Cookie;
use crate::error::{ExtractError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0";

/// Authenticated HTTP access shared by every fetch of one extraction.
///
/// Holds the cookie set and referer; never mutated after construction so it
/// can be shared between download workers behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
    cookies: Vec<Cookie>,
    referer: Option<String>,
}

impl Session {
    pub fn new(cookies: Vec<Cookie>, referer: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ExtractError::Config(format!("cannot build HTTP client: {err}")))?;

        Ok(Self {
            client,
            cookies,
            referer: referer.filter(|referer| !referer.is_empty()),
        })
    }

    fn headers(&self, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let host = url.host_str().unwrap_or_default();
        let cookie = self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches_host(host))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        if !cookie.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.insert(COOKIE, value);
            }
        }

        if let Some(referer) = &self.referer {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert(REFERER, value);
            }
        }

        headers
    }

    async fn send(&self, url: &Url) -> Result<Response> {
        let response = self
            .client
            .get(url.as_str())
            .headers(self.headers(url))
            .send()
            .await
            .map_err(|err| ExtractError::http(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::http(url, format!("response status {status}")));
        }

        Ok(response)
    }

    /// GETs `url` and returns the full body.
    pub async fn get(&self, url: &Url) -> Result<Bytes> {
        let bytes = self
            .send(url)
            .await?
            .bytes()
            .await
            .map_err(|err| ExtractError::http(url, err))?;

        debug!(%url, len = bytes.len(), "fetched");
        Ok(bytes)
    }

    pub async fn get_text(&self, url: &Url) -> Result<String> {
        let bytes = self.get(url).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| ExtractError::format(format!("{url} is not valid UTF-8: {err}")))
    }

    /// Streams the body of `url` into a new file at `path`, returning the byte count.
    ///
    /// The file is only created once the response status is known to be good.
    pub async fn download_to(&self, url: &Url, path: &Path) -> Result<u64> {
        let mut response = self.send(url).await?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|err| ExtractError::io(path, err))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| ExtractError::http(url, err))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| ExtractError::io(path, err))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|err| ExtractError::io(path, err))?;

        Ok(written)
    }
}

/// Directory URL of `url`: everything up to and including the last `/`.
pub fn base_url(url: &str) -> &str {
    match url.rfind('/') {
        Some(index) => &url[..=index],
        None => url,
    }
}

/// Resolves a playlist reference against the URL of the playlist it appeared in.
pub fn resolve(base: &Url, reference: &str) -> Result<Url> {
    let resolved = if reference.starts_with("http://") || reference.starts_with("https://") {
        Url::parse(reference)
    } else {
        base.join(reference)
    };

    resolved.map_err(|err| ExtractError::format(format!("invalid URI {reference:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn base_url_keeps_trailing_slash() {
        assert_eq!(
            base_url("https://cdn.example.com/show/master.m3u8"),
            "https://cdn.example.com/show/"
        );
        assert_eq!(base_url("master.m3u8"), "master.m3u8");
    }

    #[test]
    fn resolves_relative_and_absolute_references() {
        let base = Url::parse("https://cdn.example.com/show/720p/index.m3u8").unwrap();

        assert_eq!(
            resolve(&base, "seg1.ts").unwrap().as_str(),
            "https://cdn.example.com/show/720p/seg1.ts"
        );
        assert_eq!(
            resolve(&base, "../key.bin").unwrap().as_str(),
            "https://cdn.example.com/show/key.bin"
        );
        assert_eq!(
            resolve(&base, "https://other.example.net/a.ts").unwrap().as_str(),
            "https://other.example.net/a.ts"
        );
    }

    #[tokio::test]
    async fn sends_cookies_and_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .and(header("Referer", "https://site.example/"))
            .and(header("Cookie", "a=1; b=2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .expect(1)
            .mount(&server)
            .await;

        let cookies = vec![
            Cookie::new("a", "1"),
            Cookie::new("b", "2").with_domain("127.0.0.1"),
            Cookie::new("c", "3").with_domain("elsewhere.example"),
        ];
        let session = Session::new(cookies, Some("https://site.example/".into())).unwrap();
        let url = Url::parse(&format!("{}/index.m3u8", server.uri())).unwrap();

        assert_eq!(session.get_text(&url).await.unwrap(), "#EXTM3U\n");
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let session = Session::new(Vec::new(), None).unwrap();
        let url = Url::parse(&format!("{}/key.bin", server.uri())).unwrap();

        assert!(matches!(
            session.get(&url).await,
            Err(ExtractError::Http { .. })
        ));
    }

    #[tokio::test]
    async fn failed_download_creates_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("segment");
        let session = Session::new(Vec::new(), None).unwrap();
        let url = Url::parse(&format!("{}/seg.ts", server.uri())).unwrap();

        assert!(session.download_to(&url, &target).await.is_err());
        assert!(!target.exists());
    }
}
