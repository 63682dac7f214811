pub mod selection;

use lazy_static::lazy_static;
use regex::Regex;

pub use selection::{pick_cover, pick_video, MediaFileRef, MediaPayload, PropertyMedia, UpdateMedia};

lazy_static! {
    static ref VIDEO_EXTENSION: Regex =
        Regex::new(r"(?i)\.(mp4|webm|ogg|mov)$").expect("valid video extension pattern");
}

/// What a raw media reference turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef<'a> {
    Empty,
    /// Already usable as a media source, carried in normalized form.
    Absolute(String),
    /// Storage key that needs an exchange with the backend.
    Opaque(&'a str),
}

impl<'a> MediaRef<'a> {
    pub fn classify(value: Option<&'a str>) -> Self {
        match value {
            None | Some("") => MediaRef::Empty,
            Some(value) if is_absolute_url(value) || value.starts_with("//") => {
                MediaRef::Absolute(normalize_absolute(value))
            }
            Some(value) => MediaRef::Opaque(value),
        }
    }
}

pub fn is_absolute_url(value: &str) -> bool {
    value.starts_with("http://")
        || value.starts_with("https://")
        || value.starts_with("blob:")
        || value.starts_with("data:")
}

/// Protocol-relative URLs are pinned to https, everything else passes through.
pub fn normalize_absolute(value: &str) -> String {
    if value.starts_with("//") {
        format!("https:{}", value)
    } else {
        value.to_string()
    }
}

/// True when the URL path ends in a known video extension, ignoring any query string
/// or fragment.
pub fn is_video_url(url: &str) -> bool {
    let path = match url.find(['?', '#']) {
        Some(end) => &url[..end],
        None => url,
    };
    VIDEO_EXTENSION.is_match(path)
}
