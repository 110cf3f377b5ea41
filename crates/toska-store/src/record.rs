//! AOF record type and line codec.
//!
//! One record describes one durable mutation. Records are written as
//! newline-delimited JSON objects; the `checksum` field is the SHA-256 of the
//! canonical form of all other fields.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::checksum_hex;
use crate::error::{Result, StoreError};
use crate::SCHEMA_VERSION;

/// Mutation kind carried by an AOF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AofOp {
    /// Insert or overwrite a key.
    Set,
    /// Remove a key.
    Del,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One durable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AofRecord {
    /// Mutation kind.
    pub op: AofOp,
    /// Target key.
    pub key: String,
    /// New value; present iff `op == Set`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Absolute expiry deadline (ms since epoch); present iff a TTL was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Schema version.
    #[serde(default = "default_schema_version")]
    pub v: u32,
    /// Hex SHA-256 over the canonical form of the other fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl AofRecord {
    /// Build a sealed `set` record.
    pub fn set(key: &str, value: &str, expires_at: Option<u64>) -> Self {
        let mut record = Self {
            op: AofOp::Set,
            key: key.to_string(),
            value: Some(value.to_string()),
            expires_at,
            v: SCHEMA_VERSION,
            checksum: None,
        };
        record.seal();
        record
    }

    /// Build a sealed `del` record.
    pub fn del(key: &str) -> Self {
        let mut record = Self {
            op: AofOp::Del,
            key: key.to_string(),
            value: None,
            expires_at: None,
            v: SCHEMA_VERSION,
            checksum: None,
        };
        record.seal();
        record
    }

    /// Canonical-checksum input: every field except `checksum`. Optional
    /// fields are omitted entirely when absent, matching the wire encoding.
    fn checksum_body(&self) -> Value {
        let mut body = json!({
            "op": match self.op {
                AofOp::Set => "set",
                AofOp::Del => "del",
            },
            "key": self.key,
            "v": self.v,
        });
        if let Some(value) = &self.value {
            body["value"] = json!(value);
        }
        if let Some(expires_at) = self.expires_at {
            body["expires_at"] = json!(expires_at);
        }
        body
    }

    /// Compute and store the checksum over the current field values.
    pub fn seal(&mut self) {
        self.checksum = Some(checksum_hex(&self.checksum_body()));
    }

    /// Recompute the checksum and compare. Records without a checksum are
    /// accepted (legacy bridge).
    pub fn verify(&self) -> bool {
        match &self.checksum {
            Some(expected) => checksum_hex(&self.checksum_body()) == *expected,
            None => true,
        }
    }

    /// True when the record carries a deadline that has already passed.
    pub fn expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now_ms)
    }

    /// Encode as one log line (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one log line.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Decode a replication record from a loose JSON value. Shape errors map
    /// to `InvalidReplicationRecord`.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(StoreError::InvalidReplicationRecord);
        }
        serde_json::from_value(value.clone()).map_err(|_| StoreError::InvalidReplicationRecord)
    }
}
