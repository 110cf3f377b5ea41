//! Router assembly and serving.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tracing::info;

use toska_repl::{Follower, LeaderFiles};
use toska_store::Store;

use crate::auth::access_middleware;
use crate::config_cache::ConfigCache;
use crate::ratelimit::RateLimiter;
use crate::routes;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The storage engine.
    pub store: Arc<Store>,
    /// Leader-side replication file reads.
    pub leader: LeaderFiles,
    /// The follower, when this node replicates a leader.
    pub follower: Option<Arc<Follower>>,
    /// Hot-path config cache.
    pub cache: Arc<ConfigCache>,
    /// Per-client token buckets.
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Assemble state around an open store.
    pub fn new(store: Arc<Store>, follower: Option<Arc<Follower>>) -> Self {
        let cache = Arc::new(ConfigCache::from_config(store.config()));
        Self {
            leader: LeaderFiles::new(store.clone()),
            store,
            follower,
            cache,
            limiter: Arc::new(RateLimiter::new()),
        }
    }
}

/// Build the full router. KV paths and `/stats` sit behind the access
/// middleware; health, replication and the root do not.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/kv/mget", post(routes::mget))
        .route("/kv/keys", get(routes::list_keys))
        .route(
            "/kv/{key}",
            get(routes::get_key)
                .put(routes::put_key)
                .delete(routes::delete_key),
        )
        .route("/stats", get(routes::stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access_middleware,
        ));

    let public = Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/replication/info", get(routes::replication_info))
        .route("/replication/snapshot", get(routes::replication_snapshot))
        .route("/replication/aof", get(routes::replication_aof))
        .route("/replication/status", get(routes::replication_status));

    Router::new().merge(protected).merge(public).with_state(state)
}

/// Bind and serve until the shutdown signal fires.
pub async fn serve(
    state: AppState,
    bind: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "toska listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use toska_store::{StoreConfig, SyncMode};

    async fn state_with_config(
        dir: &std::path::Path,
        mutate: impl FnOnce(&mut StoreConfig),
    ) -> AppState {
        let mut config = StoreConfig {
            data_dir: dir.to_path_buf(),
            sync_mode: SyncMode::Always,
            ..StoreConfig::default()
        };
        mutate(&mut config);
        let store = Arc::new(Store::open(config).unwrap());
        AppState::new(store, None)
    }

    async fn plain_state(dir: &std::path::Path) -> AppState {
        state_with_config(dir, |_| {}).await
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn put(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(path: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        let response = router
            .clone()
            .oneshot(put("/kv/alpha", json!({"value": "1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"ok": true, "key": "alpha"}));

        let response = router.clone().oneshot(get("/kv/alpha")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"key": "alpha", "value": "1"})
        );

        let response = router.clone().oneshot(delete("/kv/alpha")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.clone().oneshot(get("/kv/alpha")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ttl_expiry_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        let response = router
            .clone()
            .oneshot(put("/kv/temp", json!({"value": "v", "ttl_ms": 10})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        let response = router.clone().oneshot(get("/kv/temp")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_rejects_bad_payload() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        let response = router
            .clone()
            .oneshot(put("/kv/k", json!({"no-value": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(put("/kv/k", json!({"value": 42})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_string_ttl_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        let response = router
            .clone()
            .oneshot(put("/kv/k", json!({"value": "v", "ttl_ms": "60000"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router.clone().oneshot(get("/kv/k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mget() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        router
            .clone()
            .oneshot(put("/kv/a", json!({"value": "1"})))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(post_json("/kv/mget", json!({"keys": ["a", "missing"]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"values": {"a": "1", "missing": null}})
        );
    }

    #[tokio::test]
    async fn test_mget_rejects_non_list() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        let response = router
            .clone()
            .oneshot(post_json("/kv/mget", json!({"keys": "a"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(post_json("/kv/mget", json!({"keys": ["a", 7]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_keys() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        for key in ["user:1", "user:2", "other"] {
            router
                .clone()
                .oneshot(put(&format!("/kv/{key}"), json!({"value": "v"})))
                .await
                .unwrap();
        }

        let response = router
            .clone()
            .oneshot(get("/kv/keys?prefix=user:&limit=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut keys: Vec<String> = serde_json::from_value(
            body_json(response).await["keys"].clone(),
        )
        .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);

        let response = router
            .clone()
            .oneshot(get("/kv/keys?limit=junk"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);

        router
            .clone()
            .oneshot(put("/kv/k", json!({"value": "v"})))
            .await
            .unwrap();

        let response = router.clone().oneshot(get("/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["keys"], 1);
        assert_eq!(stats["puts"], 1);
    }

    #[tokio::test]
    async fn test_health_and_root_bypass_auth() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_config(dir.path(), |config| {
            config.auth_token = String::from("secret");
        })
        .await;
        let router = build_router(state);

        let response = router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_required_when_token_set() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_config(dir.path(), |config| {
            config.auth_token = String::from("secret");
        })
        .await;
        let router = build_router(state);

        let response = router.clone().oneshot(get("/kv/k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({"error": "Unauthorized"}));

        let request = Request::builder()
            .uri("/kv/k")
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        // Authenticated; the key simply does not exist.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .uri("/kv/k")
            .header("x-toska-token", "secret")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rate_limit_burst_then_reject() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_config(dir.path(), |config| {
            config.rate_limit_per_sec = 1;
            config.rate_limit_burst = 1;
        })
        .await;
        let router = build_router(state);

        let response = router.clone().oneshot(get("/kv/k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router.clone().oneshot(get("/kv/k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Rate limit exceeded"})
        );

        // After a refill interval the client is admitted again.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let response = router.clone().oneshot(get("/kv/k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rate_limit_skips_replication_paths() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_config(dir.path(), |config| {
            config.rate_limit_per_sec = 1;
            config.rate_limit_burst = 1;
        })
        .await;
        let router = build_router(state);

        for _ in 0..5 {
            let response = router
                .clone()
                .oneshot(get("/replication/info"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_follower_mode_rejects_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_config(dir.path(), |config| {
            config.replica_url = String::from("http://leader:4000");
        })
        .await;
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(put("/kv/x", json!({"value": "v"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Read-only follower"})
        );

        let response = router.clone().oneshot(delete("/kv/x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Reads still pass through to the local replica.
        state.store.put("x", "local", None).await.unwrap();
        let response = router.clone().oneshot(get("/kv/x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"key": "x", "value": "local"})
        );
    }

    #[tokio::test]
    async fn test_replication_info_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = plain_state(dir.path()).await;
        state.store.put("k", "v", None).await.unwrap();
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(get("/replication/snapshot"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let checksum = response
            .headers()
            .get(routes::SNAPSHOT_CHECKSUM_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(
            response
                .headers()
                .get(routes::SNAPSHOT_VERSION_HEADER)
                .unwrap(),
            "1"
        );
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["checksum"], checksum.as_str());
        assert_eq!(snapshot["data"]["k"]["value"], "v");

        let response = router
            .clone()
            .oneshot(get("/replication/info"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let info = body_json(response).await;
        assert_eq!(info["aof_size"], 0);
        assert_eq!(info["snapshot_checksum"], checksum.as_str());
    }

    #[tokio::test]
    async fn test_replication_aof_stream() {
        let dir = tempfile::tempdir().unwrap();
        let state = plain_state(dir.path()).await;
        state.store.put("k", "v", None).await.unwrap();
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(get("/replication/aof?since=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let size: u64 = response
            .headers()
            .get(routes::AOF_SIZE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(
            response.headers().get(routes::AOF_OFFSET_HEADER).unwrap(),
            "0"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.len() as u64, size);

        // Caught up: 204 with the size header.
        let response = router
            .clone()
            .oneshot(get(&format!("/replication/aof?since={size}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(routes::AOF_SIZE_HEADER)
                .unwrap()
                .to_str()
                .unwrap(),
            size.to_string()
        );

        // Malformed offset.
        let response = router
            .clone()
            .oneshot(get("/replication/aof?since=-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = router
            .clone()
            .oneshot(get("/replication/aof?since=abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_replication_status_without_follower() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(plain_state(dir.path()).await);
        let response = router
            .clone()
            .oneshot(get("/replication/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_unavailable_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = plain_state(dir.path()).await;
        state.store.shutdown().await;
        let router = build_router(state);

        let response = router.clone().oneshot(get("/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = router.clone().oneshot(get("/kv/k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
