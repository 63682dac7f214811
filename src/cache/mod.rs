mod url;

pub use url::{CachedUrl, UrlCache};
