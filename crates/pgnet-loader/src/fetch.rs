//! Fetch collaborators: where manifests and partitions come from.
//!
//! The loader only needs "fetch bytes" and "fetch JSON" for a location
//! string. Locations are `http(s)://` URLs or filesystem paths.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::FetchError;

/// Source of manifest and partition bytes.
pub trait Fetch: Send + Sync {
    fn fetch_bytes(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;

    fn fetch_json(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<serde_json::Value, FetchError>> + Send {
        async move {
            let bytes = self.fetch_bytes(location).await?;
            serde_json::from_slice(&bytes).map_err(|source| FetchError::Json {
                location: location.to_string(),
                source,
            })
        }
    }
}

impl<F: Fetch + ?Sized> Fetch for Arc<F> {
    fn fetch_bytes(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        (**self).fetch_bytes(location)
    }
}

/// Plain HTTP GET with no timeout.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetch for HttpFetcher {
    async fn fetch_bytes(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let http_err = |source| FetchError::Http {
            url: location.to_string(),
            source,
        };
        let response = self.client.get(location).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: location.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(http_err)?;
        debug!(url = location, bytes = bytes.len(), "fetched");
        Ok(bytes.to_vec())
    }
}

/// Reads locations as filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFetcher;

impl FsFetcher {
    pub fn new() -> Self {
        Self
    }
}

impl Fetch for FsFetcher {
    async fn fetch_bytes(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let path = location.strip_prefix("file://").unwrap_or(location);
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(location.to_string()))
            }
            Err(source) => Err(FetchError::Io {
                path: PathBuf::from(path),
                source,
            }),
        }
    }
}

/// Dispatches on the location scheme: `http://` and `https://` go over
/// HTTP, anything else is read from disk.
#[derive(Debug, Clone, Default)]
pub struct AnyFetcher {
    http: HttpFetcher,
    fs: FsFetcher,
}

impl AnyFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_remote(location: &str) -> bool {
        location.starts_with("http://") || location.starts_with("https://")
    }
}

impl Fetch for AnyFetcher {
    async fn fetch_bytes(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        if Self::is_remote(location) {
            self.http.fetch_bytes(location).await
        } else {
            self.fs.fetch_bytes(location).await
        }
    }
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    failures: HashMap<String, usize>,
    requests: Vec<String>,
}

/// In-memory store with injectable per-location delays and failures.
///
/// Clones share state, so a test can keep a handle after giving one to
/// the loader.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, bytes: Vec<u8>) {
        self.state.lock().files.insert(location.into(), bytes);
    }

    pub fn insert_json(&self, location: impl Into<String>, value: &serde_json::Value) {
        self.insert(location, value.to_string().into_bytes());
    }

    /// Delay every fetch of `location` by `delay`.
    pub fn set_delay(&self, location: impl Into<String>, delay: Duration) {
        self.state.lock().delays.insert(location.into(), delay);
    }

    /// Fail the next `times` fetches of `location`.
    pub fn fail_next(&self, location: impl Into<String>, times: usize) {
        self.state.lock().failures.insert(location.into(), times);
    }

    /// Every location requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

impl Fetch for MemoryFetcher {
    async fn fetch_bytes(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let (delay, outcome) = {
            let mut state = self.state.lock();
            state.requests.push(location.to_string());
            let delay = state.delays.get(location).copied();
            let outcome = match state.failures.get_mut(location) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(FetchError::Unavailable {
                        location: location.to_string(),
                        reason: "injected failure".into(),
                    })
                }
                _ => state
                    .files
                    .get(location)
                    .cloned()
                    .ok_or_else(|| FetchError::NotFound(location.to_string())),
            };
            (delay, outcome)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fetch_json_and_failures() {
        let f = MemoryFetcher::new();
        f.insert_json("m/progressive.json", &serde_json::json!({ "a": 1 }));
        f.fail_next("m/progressive.json", 1);

        assert!(matches!(
            f.fetch_json("m/progressive.json").await,
            Err(FetchError::Unavailable { .. })
        ));
        let v = f.fetch_json("m/progressive.json").await.unwrap();
        assert_eq!(v["a"], 1);
        assert!(matches!(f.fetch_bytes("missing").await, Err(FetchError::NotFound(_))));
        assert_eq!(f.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fs_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-0.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let f = AnyFetcher::new();
        let loc = path.to_string_lossy().to_string();
        assert_eq!(f.fetch_bytes(&loc).await.unwrap(), vec![1, 2, 3]);

        let missing = dir.path().join("nope.bin").to_string_lossy().to_string();
        assert!(matches!(f.fetch_bytes(&missing).await, Err(FetchError::NotFound(_))));
    }

    #[test]
    fn test_scheme_dispatch() {
        assert!(AnyFetcher::is_remote("https://host/model"));
        assert!(!AnyFetcher::is_remote("/srv/models/mnist"));
    }
}
