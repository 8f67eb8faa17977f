// crates.io
use rand::RngCore;
use time::{Duration, OffsetDateTime};
// self
use oauth2_relay::{
	codec::{self, CodecKey, HASH_LABEL_REFRESH_TOKEN, SecretCodec},
	store::{Store, TokenRequestRow, TokenRow},
};
use std::sync::Arc;

fn temp_dsn(tag: &str) -> String {
	let mut nonce = [0_u8; 8];

	rand::rng().fill_bytes(&mut nonce);

	format!(
		"sqlite://{}/oauth2-relay-{tag}-{}.db?mode=rwc",
		std::env::temp_dir().display(),
		hex::encode(nonce),
	)
}

fn codec() -> Arc<SecretCodec> {
	Arc::new(SecretCodec::new(
		CodecKey::new([42_u8; 32]).expect("fixture key should be 32 bytes"),
	))
}

async fn store(tag: &str) -> Store {
	let store = Store::connect(&temp_dsn(tag), codec()).await.expect("store should connect");

	store.migrate().await.expect("migration should succeed");

	store
}

fn row_fixture(app: &str, refresh_token: &str) -> TokenRow {
	TokenRow {
		app: app.into(),
		grant_type: "authorization_code".into(),
		token_type: "Bearer".into(),
		client_id: "client-1".into(),
		client_secret: "secret-1".into(),
		original_refresh_token: refresh_token.into(),
		refresh_token: refresh_token.into(),
		access_token: "access-1".into(),
		expires_at: Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_000)),
		..Default::default()
	}
}

#[tokio::test]
async fn save_then_find_by_current_and_original_refresh_token() {
	let store = store("find").await;
	let now = OffsetDateTime::now_utc();
	let mut row = row_fixture("acme", "RT-first");
	let mut tx = store.begin().await.expect("tx should open");

	store.save(&mut tx, &mut row, now).await.expect("insert should succeed");
	tx.commit().await.expect("commit should succeed");

	let id = row.id.expect("insert should assign an id");

	// Rotate the current refresh token; the original stays queryable.
	let mut tx = store.begin().await.expect("tx should open");
	let mut stored = store
		.find_by_refresh_or_original(&mut tx, "acme", "client-1", "secret-1", "RT-first")
		.await
		.expect("lookup should succeed")
		.expect("row should be present");

	stored.refresh_token = "RT-second".into();
	store.save(&mut tx, &mut stored, now).await.expect("update should succeed");
	tx.commit().await.expect("commit should succeed");

	for token in ["RT-first", "RT-second"] {
		let mut tx = store.begin().await.expect("tx should open");
		let found = store
			.find_by_refresh_or_original(&mut tx, "acme", "client-1", "secret-1", token)
			.await
			.expect("lookup should succeed")
			.unwrap_or_else(|| panic!("row should be found via {token}"));

		assert_eq!(found.id, Some(id));
		assert_eq!(found.original_refresh_token, "RT-first");
		assert_eq!(found.refresh_token, "RT-second");
		tx.commit().await.expect("commit should succeed");
	}

	// Wrong credentials never match.
	let mut tx = store.begin().await.expect("tx should open");
	let missing = store
		.find_by_refresh_or_original(&mut tx, "acme", "client-1", "wrong-secret", "RT-second")
		.await
		.expect("lookup should succeed");

	assert!(missing.is_none());
}

#[tokio::test]
async fn secrets_are_encrypted_at_rest_and_hashes_match_the_codec() {
	let dsn = temp_dsn("atrest");
	let store = Store::connect(&dsn, codec()).await.expect("store should connect");

	store.migrate().await.expect("migration should succeed");

	let now = OffsetDateTime::now_utc();
	let mut row = row_fixture("acme", "RT-secret");
	let mut tx = store.begin().await.expect("tx should open");

	store.save(&mut tx, &mut row, now).await.expect("insert should succeed");
	tx.commit().await.expect("commit should succeed");

	// Inspect the raw columns through a second connection.
	let pool = sqlx::AnyPool::connect(&dsn).await.expect("raw pool should connect");
	let raw: (String, String, String) = sqlx::query_as(
		"SELECT refresh_token, refresh_token_hash, access_token FROM oauth_tokens WHERE id = ?",
	)
	.bind(row.id.expect("row should have an id"))
	.fetch_one(&pool)
	.await
	.expect("raw select should succeed");

	assert_ne!(raw.0, "RT-secret", "refresh token must not be stored in plaintext");
	assert_eq!(raw.1, codec::lookup_hash(HASH_LABEL_REFRESH_TOKEN, "client-1", "RT-secret"));
	assert_ne!(raw.2, "access-1", "access token must not be stored in plaintext");
	assert_eq!(
		codec().decrypt(&raw.0).expect("stored refresh token should decrypt"),
		"RT-secret",
	);
}

#[tokio::test]
async fn error_counter_survives_outside_transactions() {
	let store = store("counter").await;
	let now = OffsetDateTime::now_utc();
	let mut row = row_fixture("acme", "RT-count");
	let mut tx = store.begin().await.expect("tx should open");

	store.save(&mut tx, &mut row, now).await.expect("insert should succeed");
	tx.commit().await.expect("commit should succeed");

	let id = row.id.expect("row should have an id");

	store.bump_error_counter(id, now).await.expect("bump should succeed");
	store.bump_error_counter(id, now).await.expect("bump should succeed");

	let mut tx = store.begin().await.expect("tx should open");
	let found = store
		.find_by_refresh_or_original(&mut tx, "acme", "client-1", "secret-1", "RT-count")
		.await
		.expect("lookup should succeed")
		.expect("row should be present");

	assert_eq!(found.nr_of_subsequent_provider_errors, 2);
}

#[tokio::test]
async fn revocation_stamps_hide_rows_from_access_token_lookup() {
	let store = store("revoke").await;
	let now = OffsetDateTime::now_utc();
	let mut row = row_fixture("acme", "RT-revoke");
	let mut tx = store.begin().await.expect("tx should open");

	store.save(&mut tx, &mut row, now).await.expect("insert should succeed");
	tx.commit().await.expect("commit should succeed");

	let id = row.id.expect("row should have an id");
	let live = store
		.find_by_access_token("acme", "client-1", "access-1", now)
		.await
		.expect("lookup should succeed");

	assert_eq!(live.len(), 1);

	store.mark_refresh_token_expired(id, now).await.expect("stamp should succeed");

	let hidden = store
		.find_by_access_token("acme", "client-1", "access-1", now + Duration::seconds(1))
		.await
		.expect("lookup should succeed");

	assert!(hidden.is_empty(), "revoked rows must not serve access-token lookups");
}

#[tokio::test]
async fn username_rows_are_isolated_per_user() {
	let store = store("username").await;
	let now = OffsetDateTime::now_utc();

	for user in ["alice", "bob"] {
		let mut row = row_fixture("acme", &format!("RT-{user}"));

		row.grant_type = "password".into();
		row.username = user.into();

		let mut tx = store.begin().await.expect("tx should open");

		store.save(&mut tx, &mut row, now).await.expect("insert should succeed");
		tx.commit().await.expect("commit should succeed");
	}

	let mut tx = store.begin().await.expect("tx should open");
	let alice = store
		.find_by_username(&mut tx, "acme", "client-1", "secret-1", "alice")
		.await
		.expect("lookup should succeed")
		.expect("alice row should exist");

	assert_eq!(alice.username, "alice");
	assert_eq!(alice.refresh_token, "RT-alice");

	let nobody = store
		.find_by_username(&mut tx, "acme", "client-1", "secret-1", "carol")
		.await
		.expect("lookup should succeed");

	assert!(nobody.is_none());
}

#[tokio::test]
async fn audit_rows_round_trip_with_encrypted_fields() {
	let store = store("audit").await;
	let now = OffsetDateTime::now_utc();
	let mut audit = TokenRequestRow {
		app: "acme".into(),
		grant_type: "refresh_token".into(),
		request_client_id: "client-1".into(),
		request_client_secret: "secret-1".into(),
		request_refresh_token: "RT-audit".into(),
		request_redirect_uri: "https://localhost/callback".into(),
		..Default::default()
	};
	let mut tx = store.begin().await.expect("tx should open");

	store.insert_token_request(&mut tx, &mut audit, now).await.expect("insert should succeed");

	audit.response_token_type = "Bearer".into();
	audit.response_access_token = "A-audit".into();
	audit.response_refresh_token = "RT-audit-2".into();
	audit.response_expires_at = Some(now + Duration::seconds(3_600));
	audit.response_extra = r#"{"scope":"accounting"}"#.into();

	store.update_token_request(&mut tx, &audit, now).await.expect("update should succeed");
	tx.commit().await.expect("commit should succeed");

	let loaded = store
		.token_request_by_id(audit.id.expect("audit row should have an id"))
		.await
		.expect("load should succeed")
		.expect("audit row should exist");

	assert_eq!(loaded.request_client_secret, "secret-1");
	assert_eq!(loaded.request_refresh_token, "RT-audit");
	assert_eq!(loaded.response_access_token, "A-audit");
	assert_eq!(loaded.response_refresh_token, "RT-audit-2");
	assert_eq!(loaded.response_extra, r#"{"scope":"accounting"}"#);
}
