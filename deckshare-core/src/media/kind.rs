use std::{fmt, path::Path};

use serde::Serialize;

/// Preview classification of a file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn is_previewable(self) -> bool {
        !matches!(self, MediaKind::Unsupported)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `path` by the MIME type guessed from its extension.
///
/// Any `image/*` type counts as an image and any `video/*` type as a
/// video, even when the codec later turns out unable to decode it; that
/// case surfaces as a cached decode failure rather than here.
pub fn classify(path: &Path) -> MediaKind {
    let Some(mime) = mime_guess::from_path(path).first() else {
        return MediaKind::Unsupported;
    };

    let top = mime.type_();
    if top == mime_guess::mime::IMAGE {
        MediaKind::Image
    } else if top == mime_guess::mime::VIDEO {
        MediaKind::Video
    } else {
        MediaKind::Unsupported
    }
}
