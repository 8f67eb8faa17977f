//! Revoke coordinator: RFC 7009 passthrough serialized per provider.

// crates.io
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
// self
use crate::{
	_prelude::*,
	clock::Clock,
	coordinator::QUEUE_DEPTH,
	error::UpstreamError,
	provider::ProviderDescriptor,
	store::Store,
};

/// Normalized revocation request.
#[derive(Clone, Default)]
pub struct RevokeParams {
	/// Token to revoke.
	pub token: String,
	/// RFC 7009 `token_type_hint`: `refresh_token` or `access_token`.
	pub token_type_hint: String,
	/// Client identifier presented by the caller; salts the hash lookups.
	pub client_id: String,
	/// Caller headers forwarded upstream verbatim.
	pub headers: Vec<(String, String)>,
}
impl Debug for RevokeParams {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RevokeParams")
			.field("token", &"<redacted>")
			.field("token_type_hint", &self.token_type_hint)
			.field("client_id", &self.client_id)
			.finish_non_exhaustive()
	}
}

/// Upstream revocation response, streamed back to the caller unchanged.
#[derive(Clone, Debug)]
pub struct RevokeOutcome {
	/// Upstream HTTP status.
	pub status: u16,
	/// Upstream `Content-Type`, when present.
	pub content_type: Option<String>,
	/// Upstream body bytes.
	pub body: Vec<u8>,
}

struct RevokeJob {
	params: RevokeParams,
	reply: oneshot::Sender<Result<RevokeOutcome>>,
}

/// Handle to a provider's revoke worker.
#[derive(Clone, Debug)]
pub struct RevokeCoordinator {
	tx: mpsc::Sender<RevokeJob>,
}
impl RevokeCoordinator {
	/// Spawns the revoke worker for one provider and returns its handle.
	pub fn spawn(
		descriptor: Arc<ProviderDescriptor>,
		store: Store,
		http: reqwest::Client,
		clock: Arc<dyn Clock>,
	) -> Self {
		let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
		let worker = RevokeWorker { descriptor, store, http, clock };

		tokio::spawn(worker.run(rx));

		Self { tx }
	}

	/// Enqueues a revocation and awaits the upstream outcome.
	pub async fn revoke(&self, params: RevokeParams) -> Result<RevokeOutcome> {
		let (reply, receiver) = oneshot::channel();

		self.tx.send(RevokeJob { params, reply }).await.map_err(|_| Error::CoordinatorClosed)?;

		receiver.await.map_err(|_| Error::CoordinatorClosed)?
	}
}

struct RevokeWorker {
	descriptor: Arc<ProviderDescriptor>,
	store: Store,
	http: reqwest::Client,
	clock: Arc<dyn Clock>,
}
impl RevokeWorker {
	async fn run(self, mut rx: mpsc::Receiver<RevokeJob>) {
		while let Some(job) = rx.recv().await {
			let span = tracing::info_span!(
				"revoke_request",
				provider = %self.descriptor.name,
				hint = %job.params.token_type_hint,
			);
			let result = self.handle(job.params).instrument(span).await;

			if let Err(err) = &result {
				tracing::warn!(provider = %self.descriptor.name, error = %err, "revocation failed");
			}

			let _ = job.reply.send(result);
		}
	}

	async fn handle(&self, params: RevokeParams) -> Result<RevokeOutcome> {
		let Some(revoke) = &self.descriptor.revoke else {
			return Err(Error::invalid_request(format!(
				"provider {} does not support revocation",
				self.descriptor.name,
			)));
		};
		let mut request = self.http.post(revoke.url.clone()).form(&[
			("token", params.token.as_str()),
			("token_type_hint", params.token_type_hint.as_str()),
		]);

		// Some upstreams require subscription keys that only the caller knows, so its
		// headers travel verbatim. Transport-level headers stay ours.
		for (name, value) in &params.headers {
			if matches!(name.to_ascii_lowercase().as_str(), "host" | "content-length" | "content-type")
			{
				continue;
			}

			request = request.header(name, value);
		}

		let response = request
			.send()
			.await
			.map_err(|e| UpstreamError::Transport { message: e.to_string() })?;
		let status = response.status();
		let content_type = response
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|value| value.to_str().ok())
			.map(ToOwned::to_owned);
		let body = response
			.bytes()
			.await
			.map_err(|e| UpstreamError::Transport { message: e.to_string() })?
			.to_vec();

		if status.is_success() && !params.token.is_empty() {
			self.invalidate_rows(&params).await?;
		}

		Ok(RevokeOutcome { status: status.as_u16(), content_type, body })
	}

	/// Expires cached rows matching the revoked token. Rows the proxy never cached are
	/// simply absent; that is not an error.
	async fn invalidate_rows(&self, params: &RevokeParams) -> Result<()> {
		let now = self.clock.now();

		match params.token_type_hint.as_str() {
			"refresh_token" => {
				let row = self
					.store
					.find_by_refresh_token(&self.descriptor.name, &params.client_id, &params.token)
					.await?;

				if let Some(id) = row.and_then(|row| row.id) {
					self.store.mark_refresh_token_expired(id, now).await?;
				}
			},
			"access_token" => {
				let rows = self
					.store
					.find_by_access_token(
						&self.descriptor.name,
						&params.client_id,
						&params.token,
						now,
					)
					.await?;

				for id in rows.into_iter().filter_map(|row| row.id) {
					self.store.mark_access_token_expired(id, now).await?;
				}
			},
			_ => {},
		}

		Ok(())
	}
}
