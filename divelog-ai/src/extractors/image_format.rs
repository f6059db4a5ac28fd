//! Image payload decoding and format detection
//!
//! Formats are identified from magic bytes, never from file names or
//! caller-supplied MIME types.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::types::IngestError;

/// Image formats accepted by the vision backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::Webp),
            "image/gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }
}

/// Detect the image format from magic bytes
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, IngestError> {
    match infer::get(bytes) {
        Some(kind) => ImageFormat::from_mime(kind.mime_type()).ok_or_else(|| {
            IngestError::UnsupportedImageFormat(format!(
                "{} is not supported (expected JPEG, PNG, WebP or GIF)",
                kind.mime_type()
            ))
        }),
        None => Err(IngestError::UnsupportedImageFormat(
            "payload is not a recognizable image".to_string(),
        )),
    }
}

/// Lowercase hex SHA-256 of the image bytes, used as the source image id
pub fn source_image_id(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Image bytes as received from a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decode plain base64 or a `data:<mime>;base64,<data>` URL
    pub fn from_base64(encoded: &str) -> Result<Self, IngestError> {
        let trimmed = encoded.trim();
        let data = match trimmed.strip_prefix("data:") {
            Some(rest) => match rest.split_once(',') {
                Some((header, data)) if header.ends_with(";base64") => data,
                _ => {
                    return Err(IngestError::UnsupportedImageFormat(
                        "data URL is not base64-encoded".to_string(),
                    ))
                }
            },
            None => trimmed,
        };

        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64_STANDARD.decode(compact.as_bytes()).map_err(|e| {
            IngestError::UnsupportedImageFormat(format!("invalid base64 image data: {}", e))
        })?;
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// An image whose format has been verified, ready to send to an engine
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub source_image_id: String,
}

impl PreparedImage {
    /// Verify size and format of a payload
    pub fn prepare(payload: &ImagePayload, max_bytes: usize) -> Result<Self, IngestError> {
        if payload.is_empty() {
            return Err(IngestError::UnsupportedImageFormat(
                "image payload is empty".to_string(),
            ));
        }
        if payload.len() > max_bytes {
            return Err(IngestError::UnsupportedImageFormat(format!(
                "image is {} bytes, limit is {} bytes",
                payload.len(),
                max_bytes
            )));
        }

        let format = detect_format(payload.bytes())?;
        Ok(Self {
            bytes: payload.bytes().to_vec(),
            format,
            source_image_id: source_image_id(payload.bytes()),
        })
    }

    /// `data:` URL form used by chat-completion style vision APIs
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_detect_supported_formats() {
        assert_eq!(detect_format(PNG_HEADER).unwrap(), ImageFormat::Png);
        assert_eq!(detect_format(JPEG_HEADER).unwrap(), ImageFormat::Jpeg);
        assert_eq!(detect_format(b"GIF89a\x01\x00\x01\x00").unwrap(), ImageFormat::Gif);
    }

    #[test]
    fn test_reject_non_images() {
        let err = detect_format(PDF_HEADER).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedImageFormat(_)));

        let err = detect_format(b"Max Depth: 45m").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedImageFormat(_)));
    }

    #[test]
    fn test_base64_and_data_url_decode_to_same_bytes() {
        let encoded = BASE64_STANDARD.encode(PNG_HEADER);
        let plain = ImagePayload::from_base64(&encoded).unwrap();
        let data_url =
            ImagePayload::from_base64(&format!("data:image/png;base64,{}", encoded)).unwrap();

        assert_eq!(plain.bytes(), PNG_HEADER);
        assert_eq!(plain, data_url);
    }

    #[test]
    fn test_invalid_base64_is_unsupported_format() {
        let err = ImagePayload::from_base64("***not base64***").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedImageFormat(_)));

        let err = ImagePayload::from_base64("data:image/png,rawdata").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedImageFormat(_)));
    }

    #[test]
    fn test_prepare_enforces_size_and_emptiness() {
        let empty = ImagePayload::from_bytes(Vec::new());
        assert!(PreparedImage::prepare(&empty, 1024).is_err());

        let png = ImagePayload::from_bytes(PNG_HEADER.to_vec());
        assert!(PreparedImage::prepare(&png, 4).is_err());

        let prepared = PreparedImage::prepare(&png, 1024).unwrap();
        assert_eq!(prepared.format, ImageFormat::Png);
        assert_eq!(prepared.source_image_id.len(), 64);
        assert!(prepared.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_source_image_id_is_content_hash() {
        assert_eq!(source_image_id(b"abc"), source_image_id(b"abc"));
        assert_ne!(source_image_id(b"abc"), source_image_id(b"abd"));
        assert_eq!(
            source_image_id(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
