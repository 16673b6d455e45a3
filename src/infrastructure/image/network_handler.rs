//! HTTP(S) request handler with a disk cache in front of the network.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::disk_cache::DiskImageCache;
use crate::domain::entities::{ImageKey, LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::HuntError;
use crate::domain::ports::{FetchResult, RequestHandler};

/// Transient failures tolerated before a network hunter fails.
pub const NETWORK_RETRY_COUNT: u32 = 3;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads `http` and `https` resources.
///
/// The disk cache is keyed by URI alone, so every transform variant of a
/// resource shares one cached body.
#[derive(Debug, Clone)]
pub struct NetworkRequestHandler {
    client: reqwest::Client,
    disk_cache: Option<Arc<DiskImageCache>>,
}

impl NetworkRequestHandler {
    /// Creates a handler with its own HTTP client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        disk_cache: Option<Arc<DiskImageCache>>,
        timeout: Duration,
    ) -> Result<Self, HuntError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HuntError::internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, disk_cache))
    }

    /// Creates a handler around an existing client.
    #[must_use]
    pub const fn with_client(
        client: reqwest::Client,
        disk_cache: Option<Arc<DiskImageCache>>,
    ) -> Self {
        Self { client, disk_cache }
    }

    async fn download(&self, uri: &str, policy: NetworkPolicy) -> Result<bytes::Bytes, HuntError> {
        debug!(uri, "downloading");
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| HuntError::io(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HuntError::response(status.as_u16(), policy));
        }

        let expected = response.content_length();
        let body = response
            .bytes()
            .await
            .map_err(|e| HuntError::io(format!("failed to read body: {e}")))?;

        let received = body.len() as u64;
        if received == 0 || expected.is_some_and(|len| received < len) {
            return Err(HuntError::ContentLength { expected, received });
        }
        Ok(body)
    }
}

fn http_uri(request: &Request) -> Option<&str> {
    let uri = request.resource.as_ref()?.uri()?;
    let (scheme, _) = uri.split_once("://")?;
    (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")).then_some(uri)
}

#[async_trait::async_trait]
impl RequestHandler for NetworkRequestHandler {
    fn can_handle(&self, request: &Request) -> bool {
        http_uri(request).is_some()
    }

    async fn load(
        &self,
        request: &Request,
        network_policy: NetworkPolicy,
    ) -> Result<FetchResult, HuntError> {
        let uri = http_uri(request).ok_or_else(|| HuntError::unrecognized(request.name()))?;
        let disk_key = ImageKey::new(uri);

        if network_policy.should_read_from_disk_cache()
            && let Some(disk) = &self.disk_cache
            && let Some(bytes) = disk.get_bytes(&disk_key).await
        {
            return Ok(FetchResult::bytes(bytes, LoadedFrom::Disk));
        }

        if network_policy.is_offline_only() {
            trace!(uri, "offline and not on disk");
            return Err(HuntError::response(504, network_policy));
        }

        let body = self.download(uri, network_policy).await?;

        if network_policy.should_write_to_disk_cache()
            && let Some(disk) = &self.disk_cache
            && let Err(e) = disk.put_bytes(&disk_key, &body).await
        {
            warn!(uri, error = %e, "failed to write body to disk cache");
        }

        Ok(FetchResult::bytes(body, LoadedFrom::Network))
    }

    fn retry_count(&self) -> u32 {
        NETWORK_RETRY_COUNT
    }

    fn should_retry(&self, airplane_mode: bool, connected: bool) -> bool {
        !airplane_mode && connected
    }

    fn supports_replay(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::FetchPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `response` to every connection and counts the requests.
    async fn serve(response: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/image.png"), hits)
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbody";
    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const EMPTY: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    async fn handler() -> (NetworkRequestHandler, Arc<DiskImageCache>, TempDir) {
        let temp = TempDir::new().unwrap();
        let disk = Arc::new(
            DiskImageCache::new(temp.path().to_path_buf(), 1024 * 1024)
                .await
                .unwrap(),
        );
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let handler = NetworkRequestHandler::with_client(client, Some(disk.clone()));
        (handler, disk, temp)
    }

    fn request(uri: &str) -> Request {
        Request::uri(uri).resize(10, 10).build().unwrap()
    }

    fn body(result: FetchResult) -> Vec<u8> {
        match result.payload {
            FetchPayload::Bytes(bytes) => bytes.to_vec(),
            FetchPayload::Image(_) => panic!("expected bytes"),
        }
    }

    #[tokio::test]
    async fn test_can_handle_http_only() {
        let (handler, _disk, _temp) = handler().await;
        assert!(handler.can_handle(&request("https://example.com/a.png")));
        assert!(handler.can_handle(&request("HTTP://example.com/a.png")));
        assert!(!handler.can_handle(&request("file:///tmp/a.png")));
        assert!(!handler.can_handle(&Request::resource(7).build().unwrap()));
    }

    #[tokio::test]
    async fn test_download_writes_through_to_disk() {
        let (handler, disk, _temp) = handler().await;
        let (uri, hits) = serve(OK).await;

        let first = handler
            .load(&request(&uri), NetworkPolicy::empty())
            .await
            .unwrap();
        assert_eq!(first.loaded_from, LoadedFrom::Network);
        assert_eq!(body(first), b"body");
        assert!(disk.contains(&ImageKey::new(uri.as_str())).await);

        let second = handler
            .load(&request(&uri), NetworkPolicy::OFFLINE)
            .await
            .unwrap();
        assert_eq!(second.loaded_from, LoadedFrom::Disk);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_cache_skips_disk_and_no_store_skips_write() {
        let (handler, disk, _temp) = handler().await;
        let (uri, hits) = serve(OK).await;
        disk.put_bytes(&ImageKey::new(uri.as_str()), b"stale")
            .await
            .unwrap();

        let result = handler
            .load(&request(&uri), NetworkPolicy::NO_CACHE | NetworkPolicy::NO_STORE)
            .await
            .unwrap();
        assert_eq!(result.loaded_from, LoadedFrom::Network);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            disk.get_bytes(&ImageKey::new(uri.as_str())).await.as_deref(),
            Some(&b"stale"[..])
        );
    }

    #[tokio::test]
    async fn test_offline_miss_is_gateway_timeout() {
        let (handler, _disk, _temp) = handler().await;
        let err = handler
            .load(&request("http://127.0.0.1:9/a.png"), NetworkPolicy::OFFLINE)
            .await
            .unwrap_err();
        assert!(err.is_offline_miss());
    }

    #[tokio::test]
    async fn test_error_status_is_permanent() {
        let (handler, _disk, _temp) = handler().await;
        let (uri, _hits) = serve(NOT_FOUND).await;
        let err = handler
            .load(&request(&uri), NetworkPolicy::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, HuntError::Response { code: 404, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_body_is_content_length_error() {
        let (handler, _disk, _temp) = handler().await;
        let (uri, _hits) = serve(EMPTY).await;
        let err = handler
            .load(&request(&uri), NetworkPolicy::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, HuntError::ContentLength { received: 0, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_retry_policy() {
        let (handler, _disk, _temp) = handler().await;
        assert_eq!(handler.retry_count(), 3);
        assert!(handler.should_retry(false, true));
        assert!(!handler.should_retry(true, true));
        assert!(!handler.should_retry(false, false));
        assert!(handler.supports_replay());
    }
}
