#[macro_use]
extern crate rocket;

pub mod api;
pub mod cache;
pub mod config;
pub mod cors;
pub mod media;
pub mod models;
pub mod presign;
pub mod resolver;

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::info;
use rocket::figment::Figment;
use rocket::{Build, Rocket};

use cache::UrlCache;
use config::{AppConfig, ResolutionMode};
use presign::{DirectMediaPresigner, HttpPresigner, PresignError, Presigner, SessionToken};
use resolver::MediaResolver;

/// Builds the process-wide resolver described by the configuration.
pub fn build_resolver(config: &AppConfig, token: SessionToken) -> Result<MediaResolver, PresignError> {
    let presigner: Arc<dyn Presigner> = match config.resolution {
        ResolutionMode::Presign => {
            let base = config.files_base_url();
            info!("Resolving media keys through {}/files/presign-download", base);
            Arc::new(HttpPresigner::new(&base, token, config.timeout, &config.user_agent)?)
        }
        ResolutionMode::Direct => {
            let base = config.media_base_url();
            info!("Resolving media keys directly under {}/media", base);
            Arc::new(DirectMediaPresigner::new(&base))
        }
    };

    let cache = match config.cache_capacity.and_then(NonZeroUsize::new) {
        Some(capacity) => {
            info!("Media URL cache bounded to {} entries", capacity);
            UrlCache::bounded(capacity)
        }
        None => UrlCache::new(),
    };

    Ok(MediaResolver::builder(presigner)
        .cache(cache)
        .batch_concurrency(config.batch_concurrency)
        .build())
}

/// Assembles the rocket service around an already built resolver. `token` is the same
/// handle the resolver's presigner reads, so the session routes rotate it in place.
pub fn build_rocket(
    figment: Figment,
    config: AppConfig,
    resolver: MediaResolver,
    token: SessionToken,
) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(cors::CORS)
        .manage(resolver)
        .manage(token)
        .manage(config)
        .mount("/media", api::routes())
}
