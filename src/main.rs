mod auth;
mod config;
mod credentials;
mod database;
mod error;
mod mail;
mod model;
mod ratings;
mod routes;
mod search;
mod session;
mod state;

use actix_identity::{CookieIdentityPolicy, IdentityService};
use actix_web::{middleware::Logger, web, App, HttpServer};
use config::Config;
use log::info;
use mail::LogMailer;
use state::AppState;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

fn startup_error<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[actix_rt::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("movie_rater=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env().map_err(startup_error)?;
    let db = match &config.data_dir {
        Some(path) => sled::open(path),
        None => sled::Config::new().temporary(true).open(),
    }
    .map_err(startup_error)?;

    let mailer = Arc::new(LogMailer::new(config.contact_address.clone()));
    let state = AppState::open(
        db,
        config.bcrypt_cost,
        config.store_timeout,
        config.session_ttl,
        mailer,
    )
    .map_err(startup_error)?;
    let state = web::Data::new(state);

    // first tick fires immediately, so leftovers from the last run go at startup
    let sweeper = state.clone();
    actix_rt::spawn(async move {
        let mut interval = actix_rt::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match sweeper.run(|app| app.sessions.sweep()).await {
                Ok(0) => {}
                Ok(removed) => info!("removed {} expired sessions", removed),
                Err(err) => log::error!("session sweep failed: {:?}", err),
            }
        }
    });
    let tera = web::Data::new(routes::templates().map_err(startup_error)?);

    let private_key = config.secret.clone();
    let cookie_max_age = i64::try_from(config.session_ttl.as_secs()).unwrap_or(i64::MAX);
    info!("listening on {}", config.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(&private_key)
                    .name(routes::SESSION_COOKIE)
                    .secure(false)
                    .max_age_secs(cookie_max_age),
            ))
            .app_data(tera.clone())
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .bind(&config.bind)?
    .run()
    .await
}
