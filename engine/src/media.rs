//! Inline image handling for vision turns.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use dalibot_types::ImageReference;

/// Media type sniffed from magic bytes. Unknown data is treated as JPEG,
/// which is what Telegram serves for photos.
#[must_use]
pub fn guess_image_media_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF") {
        "image/gif"
    } else if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// A photo received from the chat platform.
#[derive(Debug, Clone, Copy)]
pub struct InboundPhoto<'a> {
    /// Platform identifier kept in history in place of the bytes.
    pub file_id: &'a str,
    pub bytes: &'a [u8],
}

impl InboundPhoto<'_> {
    /// `data:` URL carrying the base64 bytes, for the vision request only.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            guess_image_media_type(self.bytes),
            STANDARD.encode(self.bytes)
        )
    }

    #[must_use]
    pub fn reference(&self) -> ImageReference {
        ImageReference::Attachment {
            file_id: self.file_id.to_string(),
            media_type: guess_image_media_type(self.bytes).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(guess_image_media_type(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), "image/png");
        assert_eq!(guess_image_media_type(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
        assert_eq!(guess_image_media_type(b"GIF89a"), "image/gif");
        assert_eq!(guess_image_media_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(guess_image_media_type(b"????"), "image/jpeg");
    }

    #[test]
    fn data_url_inlines_bytes_but_reference_does_not() {
        let photo = InboundPhoto {
            file_id: "AQADgif",
            bytes: b"GIF89a",
        };
        assert_eq!(photo.data_url(), "data:image/gif;base64,R0lGODlh");
        assert_eq!(
            photo.reference(),
            ImageReference::Attachment {
                file_id: "AQADgif".to_string(),
                media_type: "image/gif".to_string(),
            }
        );
    }
}
