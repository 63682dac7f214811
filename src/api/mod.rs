mod error;
pub mod media;

pub use error::ApiError;

pub fn routes() -> Vec<rocket::Route> {
    routes![
        media::resolve,
        media::cached,
        media::resolve_batch,
        media::prefetch,
        media::classify,
        media::set_session,
        media::clear_session,
        media::stats,
    ]
}
