use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Media formats accepted at submission. Anything else is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp4,
    QuickTime,
    Matroska,
    WebM,
    Avi,
    Mp3,
    Wav,
    Ogg,
    Flac,
    Jpeg,
    Png,
    WebP,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

/// Fixed ffmpeg output settings for one media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputProfile {
    pub extension: &'static str,
    pub content_type: &'static str,
    pub args: &'static [&'static str],
}

const VIDEO_PROFILE: OutputProfile = OutputProfile {
    extension: "mp4",
    content_type: "video/mp4",
    args: &[
        "-c:v", "libx264",
        "-preset", "fast",
        "-c:a", "aac",
        "-movflags", "+faststart",
    ],
};

const AUDIO_PROFILE: OutputProfile = OutputProfile {
    extension: "m4a",
    content_type: "audio/mp4",
    args: &["-vn", "-c:a", "aac", "-b:a", "192k"],
};

const IMAGE_PROFILE: OutputProfile = OutputProfile {
    extension: "png",
    content_type: "image/png",
    args: &["-frames:v", "1"],
};

impl MediaFormat {
    pub const ALL: [MediaFormat; 12] = [
        MediaFormat::Mp4,
        MediaFormat::QuickTime,
        MediaFormat::Matroska,
        MediaFormat::WebM,
        MediaFormat::Avi,
        MediaFormat::Mp3,
        MediaFormat::Wav,
        MediaFormat::Ogg,
        MediaFormat::Flac,
        MediaFormat::Jpeg,
        MediaFormat::Png,
        MediaFormat::WebP,
    ];

    /// Resolve a request content type (parameters ignored) to a format.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let parsed: mime::Mime = content_type.parse().ok()?;

        let top = parsed.type_().as_str().to_ascii_lowercase();
        let sub = parsed.subtype().as_str().to_ascii_lowercase();

        let format = match (top.as_str(), sub.as_str()) {
            ("video", "mp4") => MediaFormat::Mp4,
            ("video", "quicktime") => MediaFormat::QuickTime,
            ("video", "x-matroska") => MediaFormat::Matroska,
            ("video", "webm") => MediaFormat::WebM,
            ("video", "x-msvideo") => MediaFormat::Avi,
            ("audio", "mpeg") => MediaFormat::Mp3,
            ("audio", "wav" | "x-wav") => MediaFormat::Wav,
            ("audio", "ogg") => MediaFormat::Ogg,
            ("audio", "flac") => MediaFormat::Flac,
            ("image", "jpeg") => MediaFormat::Jpeg,
            ("image", "png") => MediaFormat::Png,
            ("image", "webp") => MediaFormat::WebP,
            _ => return None,
        };
        Some(format)
    }

    pub fn kind(self) -> MediaKind {
        match self {
            MediaFormat::Mp4
            | MediaFormat::QuickTime
            | MediaFormat::Matroska
            | MediaFormat::WebM
            | MediaFormat::Avi => MediaKind::Video,
            MediaFormat::Mp3 | MediaFormat::Wav | MediaFormat::Ogg | MediaFormat::Flac => {
                MediaKind::Audio
            }
            MediaFormat::Jpeg | MediaFormat::Png | MediaFormat::WebP => MediaKind::Image,
        }
    }

    /// File extension used when staging the input for the tool.
    pub fn extension(self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::QuickTime => "mov",
            MediaFormat::Matroska => "mkv",
            MediaFormat::WebM => "webm",
            MediaFormat::Avi => "avi",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Wav => "wav",
            MediaFormat::Ogg => "ogg",
            MediaFormat::Flac => "flac",
            MediaFormat::Jpeg => "jpg",
            MediaFormat::Png => "png",
            MediaFormat::WebP => "webp",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::QuickTime => "quicktime",
            MediaFormat::Matroska => "matroska",
            MediaFormat::WebM => "webm",
            MediaFormat::Avi => "avi",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Wav => "wav",
            MediaFormat::Ogg => "ogg",
            MediaFormat::Flac => "flac",
            MediaFormat::Jpeg => "jpeg",
            MediaFormat::Png => "png",
            MediaFormat::WebP => "webp",
        }
    }

    pub fn output_profile(self) -> OutputProfile {
        self.kind().output_profile()
    }
}

impl MediaKind {
    pub fn output_profile(self) -> OutputProfile {
        match self {
            MediaKind::Video => VIDEO_PROFILE,
            MediaKind::Audio => AUDIO_PROFILE,
            MediaKind::Image => IMAGE_PROFILE,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown media format '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_map_to_formats() {
        assert_eq!(MediaFormat::from_content_type("video/mp4"), Some(MediaFormat::Mp4));
        assert_eq!(
            MediaFormat::from_content_type("video/x-matroska"),
            Some(MediaFormat::Matroska)
        );
        assert_eq!(
            MediaFormat::from_content_type("audio/wav; codecs=1"),
            Some(MediaFormat::Wav)
        );
        assert_eq!(MediaFormat::from_content_type("image/png"), Some(MediaFormat::Png));
    }

    #[test]
    fn unsupported_content_types_are_rejected() {
        assert_eq!(MediaFormat::from_content_type("application/pdf"), None);
        assert_eq!(MediaFormat::from_content_type("video/x-unknown"), None);
        assert_eq!(MediaFormat::from_content_type("not a mime"), None);
    }

    #[test]
    fn persisted_names_round_trip() {
        for format in MediaFormat::ALL {
            assert_eq!(format.as_str().parse::<MediaFormat>(), Ok(format));
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{}\"", format.as_str()));
        }
    }

    #[test]
    fn multi_word_formats_use_single_token_names() {
        for (format, name) in [
            (MediaFormat::QuickTime, "quicktime"),
            (MediaFormat::WebM, "webm"),
            (MediaFormat::WebP, "webp"),
        ] {
            assert_eq!(format.as_str(), name);
            assert_eq!(serde_json::to_value(format).unwrap(), serde_json::json!(name));
            assert_eq!(serde_json::from_value::<MediaFormat>(serde_json::json!(name)).unwrap(), format);
        }
    }

    #[test]
    fn each_kind_has_its_own_profile() {
        assert_eq!(MediaFormat::Matroska.output_profile().extension, "mp4");
        assert_eq!(MediaFormat::Flac.output_profile().content_type, "audio/mp4");
        assert_eq!(MediaFormat::Jpeg.output_profile().args, &["-frames:v", "1"]);
    }
}
