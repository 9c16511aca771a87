// Image attachments for `image` messages, sent as data URLs

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Read an image file, guessing its type from the extension
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Ok(Self::new(mime.essence_str(), bytes))
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        let image = ImageAttachment::new("image/png", vec![0x89, b'P', b'N', b'G']);
        assert_eq!(image.to_data_url(), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_from_path_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.JPG");
        fs::write(&path, b"jpegbytes").unwrap();

        let image = ImageAttachment::from_path(&path).unwrap();
        assert_eq!(image.mime, "image/jpeg");
        assert_eq!(image.bytes, b"jpegbytes");
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, [0u8, 1, 2]).unwrap();

        let image = ImageAttachment::from_path(&path).unwrap();
        assert_eq!(image.mime, "application/octet-stream");
        assert!(image.to_data_url().starts_with("data:application/octet-stream;base64,"));
    }
}
