use serde::{Deserialize, Serialize};

use super::is_video_url;
use crate::resolver::MediaResolver;

/// First resolved URL that is not a video, the cover image of a gallery.
pub fn pick_cover<S: AsRef<str>>(urls: &[S]) -> Option<&str> {
    urls.iter().map(AsRef::as_ref).find(|url| !is_video_url(url))
}

pub fn pick_video<S: AsRef<str>>(urls: &[S]) -> Option<&str> {
    urls.iter().map(AsRef::as_ref).find(|url| is_video_url(url))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaFileRef {
    pub url: Option<String>,
    pub file_url: Option<String>,
    pub secure_url: Option<String>,
}

impl MediaFileRef {
    pub fn reference(&self) -> Option<&str> {
        [&self.url, &self.file_url, &self.secure_url]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }
}

/// Media-bearing fields of a property payload. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertyMedia {
    pub primary_image: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub media_files: Vec<MediaFileRef>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(default)]
    pub media: Vec<String>,
}

impl PropertyMedia {
    fn file_refs(&self) -> impl Iterator<Item = &str> {
        self.media_files.iter().filter_map(MediaFileRef::reference)
    }

    /// The single reference a property card shows.
    pub fn primary_key(&self) -> Option<&str> {
        non_empty(self.primary_image.as_deref())
            .or_else(|| non_empty(self.image_urls.first().map(String::as_str)))
            .or_else(|| non_empty(self.image_url.as_deref()))
            .or_else(|| non_empty(self.media_urls.first().map(String::as_str)))
            .or_else(|| self.file_refs().next())
    }

    /// Every reference of the detail gallery, in display priority order.
    pub fn gallery_keys(&self) -> Vec<String> {
        self.primary_image
            .iter()
            .map(String::as_str)
            .chain(self.image_urls.iter().map(String::as_str))
            .chain(self.media_urls.iter().map(String::as_str))
            .chain(self.image_url.iter().map(String::as_str))
            .chain(self.file_refs())
            .chain(self.images.iter().map(String::as_str))
            .chain(self.videos.iter().map(String::as_str))
            .chain(self.media.iter().map(String::as_str))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Media-bearing fields of a news update payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMedia {
    #[serde(default)]
    pub media_files: Vec<MediaFileRef>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

impl UpdateMedia {
    pub fn keys(&self) -> Vec<String> {
        self.media_files
            .iter()
            .filter_map(|file| file.url.as_deref())
            .chain(self.media_urls.iter().map(String::as_str))
            .chain(self.image_urls.iter().map(String::as_str))
            .chain(self.image_url.as_deref())
            .chain(self.video_url.as_deref())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaPayloadFile {
    pub media_type: MediaKind,
    pub url: String,
}

/// Upload body describing a set of raw references, classified by their resolved URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaPayload {
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub media_files: Vec<MediaPayloadFile>,
}

impl MediaPayload {
    /// Builds the payload from whatever is already resolved; raw references are kept,
    /// references without a cached URL are left out.
    pub fn from_cached<S: AsRef<str>>(refs: &[S], resolver: &MediaResolver) -> Self {
        let mut payload = MediaPayload::default();

        for raw in refs.iter().map(AsRef::as_ref) {
            let resolved = resolver.resolve_cached(Some(raw));
            if resolved.is_empty() {
                continue;
            }

            let media_type = if is_video_url(&resolved) {
                MediaKind::Video
            } else {
                MediaKind::Image
            };

            match media_type {
                MediaKind::Image if payload.image_url.is_none() => {
                    payload.image_url = Some(raw.to_string())
                }
                MediaKind::Video if payload.video_url.is_none() => {
                    payload.video_url = Some(raw.to_string())
                }
                _ => {}
            }

            payload.media_files.push(MediaPayloadFile {
                media_type,
                url: raw.to_string(),
            });
        }

        payload
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
