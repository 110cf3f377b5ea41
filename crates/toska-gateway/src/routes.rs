//! HTTP handlers for the KV API, stats, and the replication endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use toska_repl::AofRead;
use toska_store::store::normalize_ttl;

use crate::error::ApiError;
use crate::server::AppState;

/// Default number of keys returned by `/kv/keys` when `limit` is absent.
const DEFAULT_LIST_LIMIT: usize = 1000;

/// Snapshot metadata headers on `/replication/snapshot`.
pub const SNAPSHOT_CHECKSUM_HEADER: &str = "x-toska-snapshot-checksum";
/// Snapshot schema version header.
pub const SNAPSHOT_VERSION_HEADER: &str = "x-toska-snapshot-version";
/// AOF schema version header.
pub const AOF_VERSION_HEADER: &str = "x-toska-aof-version";
/// Current AOF size header on `/replication/aof`.
pub const AOF_SIZE_HEADER: &str = "x-toska-aof-size";
/// Chunk start offset header on `/replication/aof`.
pub const AOF_OFFSET_HEADER: &str = "x-toska-aof-offset";

/// `GET /` — node identity.
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "toska",
        "version": toska_store::VERSION,
    }))
}

/// `GET /health` — liveness, bypasses middleware.
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// `GET /kv/{key}`.
pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let value = state.store.get(&key)?;
    Ok(Json(json!({"key": key, "value": value})))
}

/// `PUT /kv/{key}` with body `{"value": string, "ttl_ms"?: int|string}`.
pub async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let Some(value) = body.get("value").and_then(Value::as_str) else {
        return Err(ApiError::BadRequest(
            "value must be a string".to_string(),
        ));
    };
    let ttl_ms = normalize_ttl(body.get("ttl_ms"));
    state.store.put(&key, value, ttl_ms).await?;
    Ok(Json(json!({"ok": true, "key": key})))
}

/// `DELETE /kv/{key}`.
pub async fn delete_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete(&key).await?;
    Ok(Json(json!({"ok": true, "key": key})))
}

/// `POST /kv/mget` with body `{"keys": [string, ...]}`.
pub async fn mget(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let Some(raw_keys) = body.get("keys").and_then(Value::as_array) else {
        return Err(ApiError::BadRequest("keys must be a list".to_string()));
    };
    let mut keys = Vec::with_capacity(raw_keys.len());
    for raw in raw_keys {
        match raw.as_str() {
            Some(key) => keys.push(key.to_string()),
            None => return Err(ApiError::BadRequest("keys must be strings".to_string())),
        }
    }
    let values = state.store.mget(&keys)?;
    Ok(Json(json!({"values": values})))
}

/// `GET /kv/keys?prefix=&limit=`.
pub async fn list_keys(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let limit = match params.get("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest("invalid limit".to_string()))?,
        None => DEFAULT_LIST_LIMIT,
    };
    let keys = state.store.list_keys(&prefix, limit)?;
    Ok(Json(json!({"keys": keys})))
}

/// `GET /stats`.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.store.stats().await?;
    Ok(Json(serde_json::to_value(stats).map_err(|e| ApiError::Internal(e.to_string()))?))
}

/// `GET /replication/info`.
pub async fn replication_info(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let info = state.leader.info().await?;
    Ok(Json(serde_json::to_value(info).map_err(|e| ApiError::Internal(e.to_string()))?))
}

/// `GET /replication/snapshot` — stream the snapshot file with metadata
/// headers.
pub async fn replication_snapshot(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (bytes, info) = state.leader.snapshot_bytes().await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(checksum) = &info.snapshot_checksum {
        if let Ok(value) = HeaderValue::from_str(checksum) {
            headers.insert(SNAPSHOT_CHECKSUM_HEADER, value);
        }
    }
    headers.insert(
        SNAPSHOT_VERSION_HEADER,
        header_num(info.snapshot_version as u64),
    );
    headers.insert(AOF_VERSION_HEADER, header_num(info.aof_version as u64));

    Ok((StatusCode::OK, headers, bytes).into_response())
}

/// `GET /replication/aof?since=&max_bytes=` — stream a byte range of the AOF.
pub async fn replication_aof(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let since: i64 = match params.get("since") {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest("invalid offset".to_string()))?,
        None => 0,
    };
    let max_bytes: Option<u64> = match params.get("max_bytes") {
        Some(raw) => Some(
            raw.parse()
                .map_err(|_| ApiError::BadRequest("invalid max_bytes".to_string()))?,
        ),
        None => None,
    };

    match state.leader.aof_chunk(since, max_bytes).await? {
        AofRead::NoNewData { aof_size } => {
            let mut headers = HeaderMap::new();
            headers.insert(AOF_SIZE_HEADER, header_num(aof_size));
            Ok((StatusCode::NO_CONTENT, headers).into_response())
        }
        AofRead::Data(chunk) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(AOF_SIZE_HEADER, header_num(chunk.aof_size));
            headers.insert(AOF_OFFSET_HEADER, header_num(chunk.offset));
            Ok((StatusCode::OK, headers, chunk.bytes).into_response())
        }
    }
}

/// `GET /replication/status` — follower state, 404 when not a follower.
pub async fn replication_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let follower = state.follower.as_ref().ok_or(ApiError::NoFollower)?;
    let status = follower.status();
    Ok(Json(serde_json::to_value(status).map_err(|e| ApiError::Internal(e.to_string()))?))
}

fn header_num(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("decimal is a valid header value")
}
