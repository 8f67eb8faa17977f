//! Server binary: environment configuration, tracing, wiring, and graceful shutdown.

// std
use std::sync::Arc;
// crates.io
use anyhow::Context;
use tracing_subscriber::EnvFilter;
// self
use oauth2_relay::{
	clock::SystemClock,
	codec::{CodecKey, SecretCodec},
	gateway::{Registry, router},
	provider::catalog,
	store::Store,
	upstream::UpstreamHttpClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenvy::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let app_key = std::env::var("APP_KEY").context("APP_KEY environment variable is not set")?;
	let key = CodecKey::from_env_value(&app_key).context("APP_KEY is not usable")?;
	let database_url =
		std::env::var("DATABASE_URL").context("DATABASE_URL environment variable is not set")?;
	let port = match std::env::var("PORT") {
		Ok(raw) => raw.parse::<u16>().context("PORT is not a valid port number")?,
		Err(_) => 8080,
	};
	let codec = Arc::new(SecretCodec::new(key));
	let store = Store::connect(&database_url, codec).await.context("failed to open the database")?;

	store.migrate().await.context("failed to ensure the schema")?;

	let http = UpstreamHttpClient::new().context("failed to build the upstream HTTP client")?;
	let clock = Arc::new(SystemClock);
	let providers = catalog::standard().context("failed to build the provider catalog")?;

	tracing::info!(providers = providers.len(), port, "starting oauth2-relay");

	let registry = Registry::spawn(providers, store, http, clock.clone());
	let app = router(&registry, clock);
	let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
		.await
		.with_context(|| format!("failed to bind 0.0.0.0:{port}"))?;

	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			if let Err(err) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %err, "failed to listen for shutdown signal");
			}

			tracing::info!("shutting down");
		})
		.await
		.context("server error")?;

	Ok(())
}
