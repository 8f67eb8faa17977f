//! Token coordinator: cache-first token acquisition serialized per provider.

// crates.io
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
// self
use crate::{
	_prelude::*,
	clock::Clock,
	coordinator::QUEUE_DEPTH,
	error::{OidcError, StoreError, UpstreamError},
	oidc::IdTokenVerifier,
	provider::{GrantKind, ProviderDescriptor, TokenRequestParams},
	store::{Store, TokenRequestRow, TokenRow, Tx},
	token::{self, UpstreamToken},
	upstream::UpstreamFacade,
};

/// Token returned to the gateway: normalized fields plus the raw upstream body map.
#[derive(Clone)]
pub struct IssuedToken {
	/// Token type, typically `Bearer`.
	pub token_type: String,
	/// Access token value.
	pub access_token: String,
	/// Refresh token value; empty for grants that do not rotate one.
	pub refresh_token: String,
	/// Absolute expiry, when known.
	pub expires_at: Option<OffsetDateTime>,
	/// Raw upstream response fields; empty for cache hits.
	pub raw: JsonMap<String, JsonValue>,
}
impl IssuedToken {
	fn from_row(row: &TokenRow, raw: JsonMap<String, JsonValue>) -> Self {
		Self {
			token_type: row.token_type.clone(),
			access_token: row.access_token.clone(),
			refresh_token: row.refresh_token.clone(),
			expires_at: row.expires_at,
			raw,
		}
	}
}
impl Debug for IssuedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IssuedToken")
			.field("token_type", &self.token_type)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish_non_exhaustive()
	}
}

struct TokenJob {
	params: TokenRequestParams,
	reply: oneshot::Sender<Result<IssuedToken>>,
}

/// Handle to a provider's token worker.
#[derive(Clone, Debug)]
pub struct TokenCoordinator {
	tx: mpsc::Sender<TokenJob>,
}
impl TokenCoordinator {
	/// Spawns the worker task for one provider and returns its handle.
	pub fn spawn(
		descriptor: Arc<ProviderDescriptor>,
		store: Store,
		facade: Arc<UpstreamFacade>,
		verifier: Option<Arc<IdTokenVerifier>>,
		clock: Arc<dyn Clock>,
	) -> Self {
		let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
		let worker = Worker { descriptor, store, facade, verifier, clock };

		tokio::spawn(worker.run(rx));

		Self { tx }
	}

	/// Enqueues a token request and awaits the worker's reply.
	///
	/// Dropping the returned future does not cancel the worker's in-flight upstream
	/// call; a started refresh always completes so the rotation is never wasted.
	pub async fn request(&self, params: TokenRequestParams) -> Result<IssuedToken> {
		let (reply, receiver) = oneshot::channel();

		self.tx.send(TokenJob { params, reply }).await.map_err(|_| Error::CoordinatorClosed)?;

		receiver.await.map_err(|_| Error::CoordinatorClosed)?
	}
}
impl Debug for TokenJob {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenJob").field("params", &self.params).finish_non_exhaustive()
	}
}

struct Worker {
	descriptor: Arc<ProviderDescriptor>,
	store: Store,
	facade: Arc<UpstreamFacade>,
	verifier: Option<Arc<IdTokenVerifier>>,
	clock: Arc<dyn Clock>,
}
impl Worker {
	async fn run(self, mut rx: mpsc::Receiver<TokenJob>) {
		while let Some(job) = rx.recv().await {
			let span = tracing::info_span!(
				"token_request",
				provider = %self.descriptor.name,
				grant = %job.params.grant_type,
			);
			let result = self.handle(job.params).instrument(span).await;

			if let Err(err) = &result {
				tracing::warn!(provider = %self.descriptor.name, error = %err, "token request failed");
			}

			// The caller may have given up; the work is already persisted either way.
			let _ = job.reply.send(result);
		}
	}

	async fn handle(&self, params: TokenRequestParams) -> Result<IssuedToken> {
		if !params.code.is_empty() {
			self.exchange_code(params).await
		} else if params.grant_type == "password" {
			self.password(params).await
		} else if params.grant_type == "client_credentials" {
			self.client_credentials(params).await
		} else {
			self.refresh(params).await
		}
	}

	async fn exchange_code(&self, mut params: TokenRequestParams) -> Result<IssuedToken> {
		self.descriptor.require(GrantKind::AuthorizationCode)?;

		let now = self.clock.now();
		// Dropping the transaction on any error path rolls it back, discarding the
		// partial audit row together with it.
		let mut tx = self.store.begin().await?;
		let mut audit = self.audit_seed(&params);

		self.store.insert_token_request(&mut tx, &mut audit, now).await?;

		let mut outcome = self.facade.exchange_code(&self.descriptor, &params, now).await?;

		self.verify_id_token(&outcome.token, &params).await?;
		outcome.token.impute_expiry(now);

		// Record the first refresh token we ever saw for this row; later refreshes look
		// the row up by this value even after rotations.
		params.refresh_token = outcome.token.refresh_token.expose().to_owned();

		let mut row = TokenRow {
			app: self.descriptor.name.clone(),
			grant_type: GrantKind::AuthorizationCode.as_str().to_owned(),
			token_type: outcome.token.token_type.clone(),
			client_id: params.client_id.clone(),
			client_secret: params.client_secret.clone(),
			username: params.username.clone(),
			original_refresh_token: params.refresh_token.clone(),
			refresh_token: params.refresh_token.clone(),
			access_token: outcome.token.access_token.expose().to_owned(),
			code_exchange_response_body: outcome.raw_body.clone(),
			code_verifier: params.code_verifier.clone(),
			expires_at: outcome.token.expires_at,
			..Default::default()
		};

		self.save_row(&mut tx, &mut row, now).await?;
		fill_audit(&mut audit, &outcome.token);
		self.store.update_token_request(&mut tx, &audit, now).await?;
		tx.commit().await.map_err(StoreError::from)?;

		Ok(IssuedToken::from_row(&row, outcome.token.raw))
	}

	async fn refresh(&self, params: TokenRequestParams) -> Result<IssuedToken> {
		self.descriptor.require(GrantKind::RefreshToken)?;

		if params.refresh_token.is_empty() {
			return Err(Error::invalid_request("refresh_token is required"));
		}

		let now = self.clock.now();
		let mut tx = self.store.begin().await?;
		let found = self
			.store
			.find_by_refresh_or_original(
				&mut tx,
				&self.descriptor.name,
				&params.client_id,
				&params.client_secret,
				&params.refresh_token,
			)
			.await?;

		match found {
			None => {
				// The proxy is often deployed after an external bootstrap; adopt a
				// refresh token it has never seen before.
				let mut audit = self.audit_seed(&params);

				self.store.insert_token_request(&mut tx, &mut audit, now).await?;

				match self
					.facade
					.refresh(&self.descriptor, &params, &params.refresh_token, "", now)
					.await
				{
					Ok(mut outcome) => {
						outcome.token.impute_expiry(now);

						let refreshed = nonempty_or(
							outcome.token.refresh_token.expose(),
							&params.refresh_token,
						);
						let mut row = TokenRow {
							app: self.descriptor.name.clone(),
							grant_type: GrantKind::AuthorizationCode.as_str().to_owned(),
							token_type: outcome.token.token_type.clone(),
							client_id: params.client_id.clone(),
							client_secret: params.client_secret.clone(),
							username: params.username.clone(),
							original_refresh_token: params.refresh_token.clone(),
							refresh_token: refreshed,
							access_token: outcome.token.access_token.expose().to_owned(),
							expires_at: outcome.token.expires_at,
							..Default::default()
						};

						self.save_row(&mut tx, &mut row, now).await?;
						fill_audit(&mut audit, &outcome.token);
						self.store.update_token_request(&mut tx, &audit, now).await?;
						tx.commit().await.map_err(StoreError::from)?;

						Ok(IssuedToken::from_row(&row, outcome.token.raw))
					},
					Err(err) =>
						self.fail_or_password_fallback(tx, &params, None, audit, err, now).await,
				}
			},
			Some(mut row) => {
				if token::is_valid_at(row.expires_at, now) {
					tx.commit().await.map_err(StoreError::from)?;

					return Ok(IssuedToken::from_row(&row, JsonMap::new()));
				}

				let mut audit = self.audit_seed(&params);

				self.store.insert_token_request(&mut tx, &mut audit, now).await?;

				// Refresh with the stored token, not the caller's: rotations may have
				// left the caller holding a stale one.
				let stored_refresh = row.refresh_token.clone();
				let stored_verifier = row.code_verifier.clone();

				match self
					.facade
					.refresh(&self.descriptor, &params, &stored_refresh, &stored_verifier, now)
					.await
				{
					Ok(mut outcome) => {
						outcome.token.impute_expiry(now);

						row.token_type = outcome.token.token_type.clone();
						row.refresh_token =
							nonempty_or(outcome.token.refresh_token.expose(), &stored_refresh);
						row.access_token = outcome.token.access_token.expose().to_owned();
						row.expires_at = outcome.token.expires_at;
						row.nr_of_subsequent_provider_errors = 0;

						self.save_row(&mut tx, &mut row, now).await?;
						fill_audit(&mut audit, &outcome.token);
						self.store.update_token_request(&mut tx, &audit, now).await?;
						tx.commit().await.map_err(StoreError::from)?;

						Ok(IssuedToken::from_row(&row, outcome.token.raw))
					},
					Err(err) =>
						self.fail_or_password_fallback(tx, &params, Some(row), audit, err, now)
							.await,
				}
			},
		}
	}

	async fn password(&self, params: TokenRequestParams) -> Result<IssuedToken> {
		self.descriptor.require(GrantKind::Password)?;

		if params.username.is_empty() {
			return Err(Error::invalid_request("username is required"));
		}

		let now = self.clock.now();
		let mut tx = self.store.begin().await?;
		let found = self
			.store
			.find_by_username(
				&mut tx,
				&self.descriptor.name,
				&params.client_id,
				&params.client_secret,
				&params.username,
			)
			.await?;

		if let Some(row) = &found
			&& token::is_valid_at(row.expires_at, now)
		{
			tx.commit().await.map_err(StoreError::from)?;

			return Ok(IssuedToken::from_row(row, JsonMap::new()));
		}

		let mut audit = self.audit_seed(&params);

		self.store.insert_token_request(&mut tx, &mut audit, now).await?;

		match self.facade.password(&self.descriptor, &params, now).await {
			Ok(mut outcome) => {
				outcome.token.impute_expiry(now);

				let mut row = found.unwrap_or_else(|| TokenRow {
					app: self.descriptor.name.clone(),
					grant_type: GrantKind::Password.as_str().to_owned(),
					client_id: params.client_id.clone(),
					client_secret: params.client_secret.clone(),
					username: params.username.clone(),
					original_refresh_token: params.refresh_token.clone(),
					..Default::default()
				});

				row.token_type = outcome.token.token_type.clone();
				row.refresh_token = outcome.token.refresh_token.expose().to_owned();
				row.access_token = outcome.token.access_token.expose().to_owned();
				row.expires_at = outcome.token.expires_at;
				row.nr_of_subsequent_provider_errors = 0;

				self.save_row(&mut tx, &mut row, now).await?;
				fill_audit(&mut audit, &outcome.token);
				self.store.update_token_request(&mut tx, &audit, now).await?;
				tx.commit().await.map_err(StoreError::from)?;

				Ok(IssuedToken::from_row(&row, outcome.token.raw))
			},
			Err(err) => self.fail(tx, found, err, now).await,
		}
	}

	async fn client_credentials(&self, params: TokenRequestParams) -> Result<IssuedToken> {
		self.descriptor.require(GrantKind::ClientCredentials)?;

		let now = self.clock.now();
		let mut tx = self.store.begin().await?;
		let found = self
			.store
			.find_by_credentials(
				&mut tx,
				&self.descriptor.name,
				&params.client_id,
				&params.client_secret,
			)
			.await?;

		if let Some(row) = &found
			&& token::is_valid_at(row.expires_at, now)
		{
			tx.commit().await.map_err(StoreError::from)?;

			return Ok(IssuedToken::from_row(row, JsonMap::new()));
		}

		let mut audit = self.audit_seed(&params);

		self.store.insert_token_request(&mut tx, &mut audit, now).await?;

		match self.facade.client_credentials(&self.descriptor, &params, now).await {
			Ok(mut outcome) => {
				outcome.token.impute_expiry(now);

				let mut row = found.unwrap_or_else(|| TokenRow {
					app: self.descriptor.name.clone(),
					grant_type: GrantKind::ClientCredentials.as_str().to_owned(),
					client_id: params.client_id.clone(),
					client_secret: params.client_secret.clone(),
					..Default::default()
				});

				row.token_type = outcome.token.token_type.clone();
				row.refresh_token = outcome.token.refresh_token.expose().to_owned();
				row.access_token = outcome.token.access_token.expose().to_owned();
				row.expires_at = outcome.token.expires_at;
				row.nr_of_subsequent_provider_errors = 0;

				self.save_row(&mut tx, &mut row, now).await?;
				fill_audit(&mut audit, &outcome.token);
				self.store.update_token_request(&mut tx, &audit, now).await?;
				tx.commit().await.map_err(StoreError::from)?;

				Ok(IssuedToken::from_row(&row, outcome.token.raw))
			},
			Err(err) => self.fail(tx, found, err, now).await,
		}
	}

	/// Rolls the transaction back, records the failure against the row, and surfaces
	/// the upstream error.
	async fn fail(
		&self,
		tx: Tx,
		row: Option<TokenRow>,
		err: UpstreamError,
		now: OffsetDateTime,
	) -> Result<IssuedToken> {
		drop(tx);

		if let Some(id) = row.and_then(|row| row.id)
			&& let Err(bump_err) = self.store.bump_error_counter(id, now).await
		{
			tracing::warn!(
				provider = %self.descriptor.name,
				error = %bump_err,
				"failed to record provider error counter",
			);
		}

		Err(err.into())
	}

	/// Falls back to the password grant after a failed refresh, for providers that
	/// retain resource-owner credentials. The sole cross-grant path.
	async fn fail_or_password_fallback(
		&self,
		mut tx: Tx,
		params: &TokenRequestParams,
		row: Option<TokenRow>,
		mut audit: TokenRequestRow,
		err: UpstreamError,
		now: OffsetDateTime,
	) -> Result<IssuedToken> {
		let can_fall_back = self.descriptor.quirks.password_fallback
			&& self.descriptor.supports(GrantKind::Password)
			&& !params.username.is_empty()
			&& !params.password.is_empty();

		if !can_fall_back {
			return self.fail(tx, row, err, now).await;
		}

		tracing::info!(
			provider = %self.descriptor.name,
			"refresh failed, falling back to the password grant",
		);

		match self.facade.password(&self.descriptor, params, now).await {
			Ok(mut outcome) => {
				outcome.token.impute_expiry(now);

				let mut row = row.unwrap_or_else(|| TokenRow {
					app: self.descriptor.name.clone(),
					grant_type: GrantKind::Password.as_str().to_owned(),
					client_id: params.client_id.clone(),
					client_secret: params.client_secret.clone(),
					original_refresh_token: params.refresh_token.clone(),
					..Default::default()
				});

				let previous_refresh = row.refresh_token.clone();

				row.token_type = outcome.token.token_type.clone();
				row.username = params.username.clone();
				row.refresh_token =
					nonempty_or(outcome.token.refresh_token.expose(), &previous_refresh);
				row.access_token = outcome.token.access_token.expose().to_owned();
				row.expires_at = outcome.token.expires_at;
				row.nr_of_subsequent_provider_errors = 0;

				self.save_row(&mut tx, &mut row, now).await?;
				fill_audit(&mut audit, &outcome.token);
				self.store.update_token_request(&mut tx, &audit, now).await?;
				tx.commit().await.map_err(StoreError::from)?;

				Ok(IssuedToken::from_row(&row, outcome.token.raw))
			},
			Err(fallback_err) => self.fail(tx, row, fallback_err, now).await,
		}
	}

	/// Persists a row, adopting the surviving row once when a unique index raced.
	async fn save_row(&self, tx: &mut Tx, row: &mut TokenRow, now: OffsetDateTime) -> Result<()> {
		match self.store.save(tx, row, now).await {
			Err(Error::Store(StoreError::Conflict)) => {
				let existing = match row.grant_type.as_str() {
					"password" =>
						self.store
							.find_by_username(
								tx,
								&row.app,
								&row.client_id,
								&row.client_secret,
								&row.username,
							)
							.await?,
					"client_credentials" =>
						self.store
							.find_by_credentials(tx, &row.app, &row.client_id, &row.client_secret)
							.await?,
					_ =>
						self.store
							.find_by_refresh_or_original(
								tx,
								&row.app,
								&row.client_id,
								&row.client_secret,
								&row.refresh_token,
							)
							.await?,
				};
				let Some(existing) = existing else {
					return Err(StoreError::Conflict.into());
				};

				row.id = existing.id;
				row.created_at = existing.created_at;

				if !existing.original_refresh_token.is_empty() {
					row.original_refresh_token = existing.original_refresh_token;
				}

				self.store.save(tx, row, now).await
			},
			other => other,
		}
	}

	async fn verify_id_token(
		&self,
		token: &UpstreamToken,
		params: &TokenRequestParams,
	) -> Result<()> {
		let Some(verifier) = &self.verifier else {
			return Ok(());
		};
		let Some(id_token) = token.raw.get("id_token").and_then(JsonValue::as_str) else {
			return Ok(());
		};

		match verifier.verify(id_token, &params.client_id).await {
			Ok(()) => Ok(()),
			// Keyset outages must not block issuance.
			Err(OidcError::DecodeKeys { reason }) => {
				tracing::warn!(
					provider = %self.descriptor.name,
					%reason,
					"skipping id_token verification",
				);

				Ok(())
			},
			Err(err) => Err(err.into()),
		}
	}

	fn audit_seed(&self, params: &TokenRequestParams) -> TokenRequestRow {
		TokenRequestRow {
			app: self.descriptor.name.clone(),
			grant_type: params.grant_type.clone(),
			request_client_id: params.client_id.clone(),
			request_client_secret: params.client_secret.clone(),
			request_refresh_token: params.refresh_token.clone(),
			request_code: params.code.clone(),
			request_redirect_uri: params.redirect_uri.clone(),
			request_code_verifier: params.code_verifier.clone(),
			request_username: params.username.clone(),
			..Default::default()
		}
	}
}

fn fill_audit(audit: &mut TokenRequestRow, token: &UpstreamToken) {
	audit.response_token_type = token.token_type.clone();
	audit.response_access_token = token.access_token.expose().to_owned();
	audit.response_refresh_token = token.refresh_token.expose().to_owned();
	audit.response_expires_at = token.expires_at;
	audit.response_extra = serde_json::to_string(&token.raw).unwrap_or_default();
}

fn nonempty_or(preferred: &str, fallback: &str) -> String {
	if preferred.is_empty() { fallback.to_owned() } else { preferred.to_owned() }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rotation_keeps_the_stored_token_when_upstream_omits_one() {
		assert_eq!(nonempty_or("", "stored"), "stored");
		assert_eq!(nonempty_or("rotated", "stored"), "rotated");
	}
}
