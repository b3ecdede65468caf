mod api;
mod config;
mod controller;
mod document;
mod domain;
mod error;
mod progress;
mod session;
mod storage;
mod storefront_client;
#[cfg(test)]
mod testing;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use config::Config;
use controller::SessionController;
use document::PageArchiveLoader;
use migration::MigratorTrait;
use poem::{
    EndpointExt, Route, Server,
    listener::TcpListener,
    middleware::{Cors, Tracing as PoemTracing},
};
use poem_openapi::OpenApiService;
use progress::ProgressStore;
use sea_orm::Database;
use session::{LibraryEvent, SessionContext, UserIdentity, guard::TamperMonitor};
use storage::SqliteProgressCache;
use storefront_client::StorefrontClient;
use tokio::sync::broadcast;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};

type StorefrontResult<T> = anyhow::Result<T>;

#[tokio::main]
async fn main() -> StorefrontResult<()> {
    // Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!(
        "{}=info,poem=info,reqwest=warn,h2=warn",
        env!("CARGO_PKG_NAME")
    );
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting storefront reader"
    );
    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Config::load()?;
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!(e));
    }

    let db_conn = Database::connect(&config.db_connection_string)
        .await
        .with_context(|| "Failed to connect to database")?;

    migration::Migrator::up(&db_conn, None)
        .await
        .with_context(|| "Failed to run database migrations")?;

    let client = Arc::new(
        StorefrontClient::new(&config.base_url)?.with_auth_token(config.auth_token.clone()),
    );
    tracing::info!(base_url = %config.base_url, signed_in = client.has_credentials(), "configured storefront client");

    let store = Arc::new(ProgressStore::new(
        client.clone(),
        Arc::new(SqliteProgressCache::new(Arc::new(db_conn))),
    ));
    let (library_events, _) = broadcast::channel(16);
    let ctx = SessionContext {
        identity: config.has_auth_token().then(|| UserIdentity {
            label: config.user_label.clone(),
        }),
        source: client.clone(),
        store: store.clone(),
        tamper: TamperMonitor::default(),
        settings: config.session_settings(),
        library_events,
    };
    let controller = Arc::new(SessionController::new(ctx, Arc::new(PageArchiveLoader)));

    let mut refreshes = controller.subscribe_library();
    tokio::spawn(async move {
        loop {
            match refreshes.recv().await {
                Ok(LibraryEvent::SessionClosed { content_id }) => {
                    tracing::info!(%content_id, "library progress changed; refresh due");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "library refresh events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    run_poem(client, store, controller, &config.bind_addr).await?;
    Ok(())
}

pub async fn run_poem(
    client: Arc<StorefrontClient>,
    store: Arc<ProgressStore>,
    controller: Arc<SessionController>,
    bind_addr: &str,
) -> StorefrontResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    let api = api::StorefrontApi {
        client,
        store,
        controller: controller.clone(),
    };
    let api_service = OpenApiService::new(api, "Storefront Reader API", version)
        .server(format!("http://{}", bind_addr));
    let ui = api_service.rapidoc();
    let spec = api_service.spec();
    let route = Route::new()
        .nest("/", api_service)
        .nest("/ui", ui)
        .nest("/spec", poem::endpoint::make_sync(move |_| spec.clone()))
        .with(Cors::new())
        .with(PoemTracing);

    tracing::info!(%bind_addr, "starting HTTP server");
    Server::new(TcpListener::bind(bind_addr.to_string()))
        .run_with_graceful_shutdown(
            route,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            None,
        )
        .await?;
    // flush the open session before exiting
    controller.close().await;
    Ok(())
}
