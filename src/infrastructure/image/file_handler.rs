//! Local file request handler.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::trace;

use crate::domain::entities::{LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::HuntError;
use crate::domain::ports::{FetchResult, RequestHandler};

const FILE_SCHEME: &str = "file://";

/// Loads `file://` URIs and absolute paths from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRequestHandler;

impl FileRequestHandler {
    /// Creates a file handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn local_path(request: &Request) -> Option<PathBuf> {
    let uri = request.resource.as_ref()?.uri()?;
    if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
        return Some(PathBuf::from(path));
    }
    let path = Path::new(uri);
    path.is_absolute().then(|| path.to_path_buf())
}

#[async_trait::async_trait]
impl RequestHandler for FileRequestHandler {
    fn can_handle(&self, request: &Request) -> bool {
        local_path(request).is_some()
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<FetchResult, HuntError> {
        let path = local_path(request).ok_or_else(|| HuntError::unrecognized(request.name()))?;
        trace!(path = %path.display(), "reading file");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| HuntError::io(format!("{}: {e}", path.display())))?;
        Ok(FetchResult::bytes(Bytes::from(bytes), LoadedFrom::Disk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::FetchPayload;
    use tempfile::TempDir;

    fn request(uri: &str) -> Request {
        Request::uri(uri).build().unwrap()
    }

    #[test]
    fn test_can_handle() {
        let handler = FileRequestHandler::new();
        assert!(handler.can_handle(&request("file:///tmp/a.png")));
        assert!(handler.can_handle(&request("/tmp/a.png")));
        assert!(!handler.can_handle(&request("relative/a.png")));
        assert!(!handler.can_handle(&request("https://example.com/a.png")));
        assert!(!handler.can_handle(&Request::resource(1).build().unwrap()));
    }

    #[tokio::test]
    async fn test_reads_file_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.png");
        tokio::fs::write(&path, b"pixels").await.unwrap();

        for uri in [
            format!("file://{}", path.display()),
            path.display().to_string(),
        ] {
            let result = FileRequestHandler::new()
                .load(&request(&uri), NetworkPolicy::empty())
                .await
                .unwrap();
            assert_eq!(result.loaded_from, LoadedFrom::Disk);
            assert!(matches!(result.payload, FetchPayload::Bytes(ref b) if b.as_ref() == b"pixels"));
        }
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_retries() {
        let temp = TempDir::new().unwrap();
        let uri = temp.path().join("missing.png").display().to_string();
        let handler = FileRequestHandler::new();

        let err = handler
            .load(&request(&uri), NetworkPolicy::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, HuntError::Io { .. }));
        assert_eq!(handler.retry_count(), 0);
        assert!(!handler.supports_replay());
    }
}
