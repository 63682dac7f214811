use std::env;
use std::process;

use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use rocket::{
    figment::{
        providers::{Format, Toml},
        Figment, Profile,
    },
    Config,
};

use mediaref::config::AppConfig;
use mediaref::presign::SessionToken;

#[rocket::main]
async fn main() {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let mut figment = Figment::from(Config::default()).merge(Toml::file("App.toml").nested());

    for (var, key) in [
        ("API_BASE_URL", "api_base_url"),
        ("MEDIA_BASE_URL", "media_base_url"),
        ("API_TOKEN", "api_token"),
    ] {
        if let Ok(value) = env::var(var) {
            figment = figment.merge((key, value));
        }
    }

    figment = figment.select(Profile::from_env_or("APP_PROFILE", "default"));

    let config = match figment.extract::<AppConfig>() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            process::exit(1);
        }
    };
    info!("Configuration loaded successfully");

    let token = SessionToken::new(config.api_token.clone());
    if token.get().is_none() {
        info!("No API token configured, presign requests are sent unauthenticated");
    }

    let resolver = match mediaref::build_resolver(&config, token.clone()) {
        Ok(resolver) => resolver,
        Err(err) => {
            error!("Failed to build media resolver: {}", err);
            process::exit(1);
        }
    };

    info!(
        "Starting media resolver on {}:{} (batch concurrency {})",
        config.address, config.port, config.batch_concurrency
    );

    if let Err(err) = mediaref::build_rocket(figment, config, resolver, token).launch().await {
        error!("Server stopped with error: {}", err);
        process::exit(1);
    }
}
