use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use fastrace::trace;
use thiserror::Error;
use tracing::debug;

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to read image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Image is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),
}

/// Raw content of a selected image file.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
    pub file_name: Option<String>,
}

/// Something the user picked as a profile image. Reading it is the only
/// suspending step of a submission.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn read(&self, limit: u64) -> Result<ImagePayload, ImageError>;

    fn describe(&self) -> String;
}

pub struct ImageFile {
    path: PathBuf,
}

impl ImageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ImageSource for ImageFile {
    async fn read(&self, limit: u64) -> Result<ImagePayload, ImageError> {
        let read_err = |source| ImageError::Read {
            path: self.path.display().to_string(),
            source,
        };

        let metadata = tokio::fs::metadata(&self.path).await.map_err(read_err)?;
        if metadata.len() > limit {
            return Err(ImageError::TooLarge {
                size: metadata.len(),
                limit,
            });
        }

        let bytes = tokio::fs::read(&self.path).await.map_err(read_err)?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());

        Ok(ImagePayload {
            bytes,
            mime: None,
            file_name,
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Image content already held in memory, e.g. pasted or generated.
pub struct ImageBytes {
    bytes: Vec<u8>,
    mime: Option<String>,
}

impl ImageBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

#[async_trait]
impl ImageSource for ImageBytes {
    async fn read(&self, _limit: u64) -> Result<ImagePayload, ImageError> {
        Ok(ImagePayload {
            bytes: self.bytes.clone(),
            mime: self.mime.clone(),
            file_name: None,
        })
    }

    fn describe(&self) -> String {
        format!("<{} bytes in memory>", self.bytes.len())
    }
}

/// A `data:<mime>;base64,<payload>` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    mime: String,
    payload: String,
}

impl DataUri {
    pub fn from_bytes(mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime: mime.into(),
            payload: BASE64_STANDARD.encode(bytes),
        }
    }

    pub fn parse(uri: &str) -> Result<Self, ImageError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| ImageError::InvalidDataUri("missing `data:` prefix".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ImageError::InvalidDataUri("missing `,` separator".to_string()))?;

        let mut segments = header.split(';');
        let mime = segments.next().unwrap_or_default();
        if !segments.any(|segment| segment.eq_ignore_ascii_case("base64")) {
            return Err(ImageError::InvalidDataUri(
                "payload is not base64 encoded".to_string(),
            ));
        }

        let mime = if mime.is_empty() { FALLBACK_MIME } else { mime };
        Ok(Self {
            mime: mime.to_string(),
            payload: payload.to_string(),
        })
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn decode(&self) -> Result<Vec<u8>, ImageError> {
        BASE64_STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| ImageError::InvalidDataUri(e.to_string()))
    }

    /// Size of the decoded content, computed from the payload length.
    pub fn decoded_len(&self) -> usize {
        let padding = self.payload.bytes().rev().take_while(|b| *b == b'=').count();
        (self.payload.len() / 4 * 3).saturating_sub(padding)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime, self.payload)
    }
}

/// Reads the source and encodes it as a data URI.
#[trace]
pub async fn encode_image(source: &dyn ImageSource, limit: u64) -> Result<DataUri, ImageError> {
    let payload = source.read(limit).await?;
    let size = payload.bytes.len() as u64;
    if size > limit {
        return Err(ImageError::TooLarge { size, limit });
    }

    let mime = payload
        .mime
        .clone()
        .or_else(|| sniff_mime(&payload.bytes).map(str::to_string))
        .or_else(|| {
            payload
                .file_name
                .as_deref()
                .and_then(mime_from_extension)
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_MIME.to_string());

    debug!("Encoded {} ({} bytes, {})", source.describe(), size, mime);
    Ok(DataUri::from_bytes(mime, &payload.bytes))
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }

    let head = &bytes[..bytes.len().min(256)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start();
    if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

pub fn mime_from_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[tokio::test]
    async fn test_encode_bytes_sniffs_png() {
        let uri = encode_image(&ImageBytes::new(PNG_HEADER), 1024).await.unwrap();
        assert_eq!(uri.mime(), "image/png");
        assert!(uri.to_string().starts_with("data:image/png;base64,iVBORw0KGgo"));
        assert_eq!(uri.decode().unwrap(), PNG_HEADER);
        assert_eq!(uri.decoded_len(), PNG_HEADER.len());
    }

    #[tokio::test]
    async fn test_declared_mime_wins() {
        let source = ImageBytes::new(PNG_HEADER.to_vec()).with_mime("image/x-custom");
        let uri = encode_image(&source, 1024).await.unwrap();
        assert_eq!(uri.mime(), "image/x-custom");
    }

    #[tokio::test]
    async fn test_encode_file_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.avif");
        std::fs::write(&path, b"not really avif").unwrap();

        let uri = encode_image(&ImageFile::new(&path), 1024).await.unwrap();
        assert_eq!(uri.mime(), "image/avif");
        assert_eq!(uri.decode().unwrap(), b"not really avif");
    }

    #[tokio::test]
    async fn test_unknown_content_is_octet_stream() {
        let uri = encode_image(&ImageBytes::new(vec![1, 2, 3]), 1024).await.unwrap();
        assert_eq!(uri.to_string(), "data:application/octet-stream;base64,AQID");
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ImageFile::new(dir.path().join("nope.png"));
        let err = encode_image(&source, 1024).await.unwrap_err();
        assert!(matches!(err, ImageError::Read { .. }));
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = encode_image(&ImageFile::new(&path), 16).await.unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { size: 64, limit: 16 }));

        let err = encode_image(&ImageBytes::new(vec![0u8; 64]), 16).await.unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { size: 64, limit: 16 }));
    }

    #[test]
    fn test_parse_data_uri() {
        let uri = DataUri::parse("data:image/gif;base64,R0lGODlh").unwrap();
        assert_eq!(uri.mime(), "image/gif");
        assert_eq!(uri.decode().unwrap(), b"GIF89a");
        assert_eq!(uri.to_string(), "data:image/gif;base64,R0lGODlh");

        assert!(DataUri::parse("http://example.com/a.png").is_err());
        assert!(DataUri::parse("data:image/png,plain").is_err());
        assert!(DataUri::parse("data:image/png;base64").is_err());
    }

    #[test]
    fn test_sniff_svg() {
        assert_eq!(sniff_mime(b"  <svg xmlns=\"http://www.w3.org/2000/svg\"/>"), Some("image/svg+xml"));
        assert_eq!(sniff_mime(b"<?xml version=\"1.0\"?><svg/>"), Some("image/svg+xml"));
        assert_eq!(sniff_mime(b"<html>"), None);
    }
}
