//! Shared file-serving helpers: range parsing, content-type guessing and
//! chunked file serving via `ReaderStream`.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// A parsed single `Range: bytes=...` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-` or `bytes=START-END`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-N`: the last N bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Inclusive `(start, end)` within a file of `size` bytes, or `None`
    /// when unsatisfiable.
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let (start, end) = match self {
            ByteRange::From { start, end } => (start, end.unwrap_or(size - 1).min(size - 1)),
            ByteRange::Suffix(0) => return None,
            ByteRange::Suffix(n) => (size.saturating_sub(n), size - 1),
        };
        (start <= end && start < size).then_some((start, end))
    }
}

/// Parse a `Range` header value. Multi-range requests are not supported
/// and parse as `None` (served whole).
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let range_set = value.trim().strip_prefix("bytes=")?;
    if range_set.contains(',') {
        return None;
    }
    let (start_str, end_str) = range_set.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        return Some(ByteRange::Suffix(end_str.parse().ok()?));
    }
    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };
    Some(ByteRange::From { start, end })
}

/// Guess the MIME type from a file name's extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "ts" => "video/mp2t",
        "m3u8" => "application/vnd.apple.mpegurl",
        "vtt" => "text/vtt; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Serve a file in 64 KiB chunks, honouring a single byte range.
pub async fn serve_file_streaming(
    file_path: &Path,
    content_type: &str,
    range_header: Option<&str>,
) -> Result<Response, rw_core::Error> {
    let metadata = tokio::fs::metadata(file_path)
        .await
        .map_err(|_| rw_core::Error::not_found("file", file_path.display()))?;
    let file_size = metadata.len();

    let mut file = tokio::fs::File::open(file_path)
        .await
        .map_err(|_| rw_core::Error::not_found("file", file_path.display()))?;

    let Some(range) = range_header.and_then(parse_range_header) else {
        let stream = ReaderStream::with_capacity(file, 64 * 1024);
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CONTENT_LENGTH, file_size.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            Body::from_stream(stream),
        )
            .into_response());
    };

    let Some((start, end)) = range.resolve(file_size) else {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
            Body::empty(),
        )
            .into_response());
    };

    let length = end - start + 1;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let stream = ReaderStream::with_capacity(file.take(length), 64 * 1024);

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_RANGE, format!("bytes {start}-{end}/{file_size}")),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn parse_range_forms() {
        assert_eq!(
            parse_range_header("bytes=0-999"),
            Some(ByteRange::From { start: 0, end: Some(999) })
        );
        assert_eq!(parse_range_header("bytes=500-"), Some(ByteRange::From { start: 500, end: None }));
        assert_eq!(parse_range_header("bytes=-200"), Some(ByteRange::Suffix(200)));
        assert!(parse_range_header("invalid").is_none());
        assert!(parse_range_header("bytes=abc-def").is_none());
        assert!(parse_range_header("bytes=0-1,5-6").is_none());
    }

    #[test]
    fn resolve_clamps_and_rejects() {
        assert_eq!(ByteRange::From { start: 10, end: Some(5000) }.resolve(100), Some((10, 99)));
        assert_eq!(ByteRange::Suffix(30).resolve(100), Some((70, 99)));
        assert_eq!(ByteRange::Suffix(300).resolve(100), Some((0, 99)));
        assert_eq!(ByteRange::From { start: 100, end: None }.resolve(100), None);
        assert_eq!(ByteRange::Suffix(0).resolve(100), None);
        assert_eq!(ByteRange::From { start: 0, end: None }.resolve(0), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(guess_content_type("seg_00001.ts"), "video/mp2t");
        assert_eq!(guess_content_type("index.HTML"), "text/html; charset=utf-8");
        assert_eq!(guess_content_type("track.vtt"), "text/vtt; charset=utf-8");
        assert_eq!(guess_content_type("file.xyz"), "application/octet-stream");
    }

    #[tokio::test]
    async fn serves_ranges_and_416() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let resp = serve_file_streaming(&path, "application/octet-stream", Some("bytes=2-4"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 2-4/10");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"234");

        let resp = serve_file_streaming(&path, "application/octet-stream", Some("bytes=20-"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes */10");

        let resp = serve_file_streaming(&path, "application/octet-stream", None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "10");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = serve_file_streaming(Path::new("/nonexistent/reelway"), "text/plain", None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
