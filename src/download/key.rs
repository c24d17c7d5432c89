use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use super::Session;
use crate::error::{ExtractError, Result};

/// Where the caller wants decryption keys to come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeySource {
    /// Use whatever `EXT-X-KEY` directives point at.
    #[default]
    Playlist,
    /// Raw key bytes supplied up front.
    Bytes(Bytes),
    /// Key URI fetched once before any playlist is parsed.
    Uri(Url),
}

impl KeySource {
    /// Interprets a command line key: `http(s)` URLs are fetched, anything else is base64.
    pub fn from_arg(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self::Playlist);
        }

        if value.starts_with("http") {
            let url = Url::parse(value)
                .map_err(|err| ExtractError::Config(format!("invalid key URL {value:?}: {err}")))?;
            return Ok(Self::Uri(url));
        }

        base64::engine::general_purpose::STANDARD
            .decode(value)
            .map(|key| Self::Bytes(Bytes::from(key)))
            .map_err(|err| ExtractError::Config(format!("key is not valid base64: {err}")))
    }
}

/// Supplies raw key bytes to the media playlist parser.
pub trait KeyResolver {
    /// Key that answers every `METHOD=AES-128` directive, if the caller gave one.
    fn preset(&self) -> Option<Bytes>;

    /// Fetches the key published at `uri`.
    fn fetch(&mut self, uri: &Url) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Resolves keys through the extraction's [`Session`], caching each URI.
pub struct SessionKeyResolver {
    session: Arc<Session>,
    preset: Option<Bytes>,
    cache: HashMap<Url, Bytes>,
}

impl SessionKeyResolver {
    pub fn new(session: Arc<Session>, preset: Option<Bytes>) -> Self {
        Self {
            session,
            preset,
            cache: HashMap::new(),
        }
    }

    /// Turns a [`KeySource`] into the preset key, fetching it when it is a URI.
    pub async fn preset_from(session: &Session, source: &KeySource) -> Result<Option<Bytes>> {
        match source {
            KeySource::Playlist => Ok(None),
            KeySource::Bytes(key) => Ok(Some(key.clone())),
            KeySource::Uri(uri) => {
                debug!(%uri, "fetching key");
                let key = session.get(uri).await?;
                debug!(len = key.len(), "key fetched");
                Ok(Some(key))
            }
        }
    }
}

impl KeyResolver for SessionKeyResolver {
    fn preset(&self) -> Option<Bytes> {
        self.preset.clone()
    }

    async fn fetch(&mut self, uri: &Url) -> Result<Bytes> {
        if let Some(key) = self.cache.get(uri) {
            return Ok(key.clone());
        }

        debug!(%uri, "fetching key");
        let key = self.session.get(uri).await?;
        debug!(len = key.len(), "key fetched");
        self.cache.insert(uri.clone(), key.clone());

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn key_argument_forms() {
        assert_eq!(KeySource::from_arg("").unwrap(), KeySource::Playlist);
        assert_eq!(
            KeySource::from_arg("AAECAwQFBgcICQoLDA0ODw==").unwrap(),
            KeySource::Bytes(Bytes::from((0u8..16).collect::<Vec<_>>()))
        );
        assert_eq!(
            KeySource::from_arg("https://keys.example.com/k1").unwrap(),
            KeySource::Uri(Url::parse("https://keys.example.com/k1").unwrap())
        );
        assert!(matches!(
            KeySource::from_arg("not base64!"),
            Err(ExtractError::Config(_))
        ));
    }

    #[tokio::test]
    async fn fetches_each_uri_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/k1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 16]))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(Session::new(Vec::new(), None).unwrap());
        let mut resolver = SessionKeyResolver::new(session, None);
        let uri = Url::parse(&format!("{}/k1", server.uri())).unwrap();

        assert_eq!(resolver.fetch(&uri).await.unwrap(), Bytes::from(vec![7u8; 16]));
        assert_eq!(resolver.fetch(&uri).await.unwrap(), Bytes::from(vec![7u8; 16]));
        assert_eq!(resolver.preset(), None);
    }

    #[tokio::test]
    async fn preset_from_uri_is_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/preset"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 16]))
            .mount(&server)
            .await;

        let session = Session::new(Vec::new(), None).unwrap();
        let source = KeySource::Uri(Url::parse(&format!("{}/preset", server.uri())).unwrap());

        let preset = SessionKeyResolver::preset_from(&session, &source).await.unwrap();

        assert_eq!(preset, Some(Bytes::from(vec![1u8; 16])));
    }

    #[tokio::test]
    async fn missing_key_is_an_http_error() {
        let server = MockServer::start().await;
        let session = Arc::new(Session::new(Vec::new(), None).unwrap());
        let mut resolver = SessionKeyResolver::new(session, None);
        let uri = Url::parse(&format!("{}/gone", server.uri())).unwrap();

        assert!(matches!(
            resolver.fetch(&uri).await,
            Err(ExtractError::Http { .. })
        ));
    }
}
