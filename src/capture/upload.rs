use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;

use crate::error::{AgentError, Result};

/// An image picked by the user, fully read before any request goes out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageUpload {
    /// Detects the format from the file's magic bytes; anything that is not a
    /// recognised image is rejected.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes)
            .map_err(|e| AgentError::DataFormat(format!("not a supported image: {}", e)))?;
        Ok(Self {
            bytes,
            mime_type: format.to_mime_type().to_string(),
        })
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AgentError::io(format!("reading {}", path.display()), e))?;
        log::debug!("Read {} bytes from {}", bytes.len(), path.display());
        Self::from_bytes(bytes)
    }

    /// `data:` URL used as the preview and as a message's media reference.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Smallest valid PNG header the sniffer accepts.
    pub fn png_bytes() -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::png_bytes;
    use super::*;

    #[test]
    fn png_is_sniffed() {
        let upload = ImageUpload::from_bytes(png_bytes()).unwrap();
        assert_eq!(upload.mime_type, "image/png");
        assert!(upload.data_url().starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn jpeg_is_sniffed() {
        let upload = ImageUpload::from_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).unwrap();
        assert_eq!(upload.mime_type, "image/jpeg");
    }

    #[test]
    fn text_is_rejected() {
        let err = ImageUpload::from_bytes(b"just some notes".to_vec()).unwrap_err();
        assert!(matches!(err, AgentError::DataFormat(_)));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageUpload::read(&dir.path().join("nope.png")).await.unwrap_err();
        assert!(matches!(err, AgentError::Io { .. }));
    }

    #[tokio::test]
    async fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portrait.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let upload = ImageUpload::read(&path).await.unwrap();
        assert_eq!(upload.bytes, png_bytes());
    }
}
