//! Cursor Codec
//!
//! Opaque, URL-safe resume tokens carrying the sort tuple of the last row of
//! a page and the fingerprint of the sort that produced it. A token is
//! base64url (no padding) over a 4-byte checksum followed by a versioned JSON
//! payload; a damaged token fails to decode instead of resuming at the wrong
//! row.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PaginationError;
use crate::pagination::{SortSpec, SortValue};

const CURSOR_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 4;

#[derive(Serialize)]
struct CursorPayloadRef<'a> {
    v: u8,
    s: &'a str,
    k: &'a [SortValue],
}

#[derive(Deserialize)]
struct CursorPayload {
    v: u8,
    s: String,
    k: Vec<SortValue>,
}

// == Cursor ==
/// Decoded resume point: one value per sort field, tie-break last, plus the
/// fingerprint of the sort it was taken under.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    sort: String,
    values: Vec<SortValue>,
}

impl Cursor {
    /// Cursor at the row whose full sort tuple under `spec` is `values`.
    /// `-0.0` is stored as `0.0`.
    pub fn new(spec: &SortSpec, values: Vec<SortValue>) -> Self {
        Self {
            sort: spec.fingerprint(),
            values: values.into_iter().map(SortValue::normalized).collect(),
        }
    }

    /// Fingerprint of the sort this cursor resumes.
    pub fn sort(&self) -> &str {
        &self.sort
    }

    /// Whether this cursor was taken under `spec`.
    pub fn belongs_to(&self, spec: &SortSpec) -> bool {
        self.sort == spec.fingerprint()
    }

    pub fn values(&self) -> &[SortValue] {
        &self.values
    }

    pub fn tie_break(&self) -> Option<&SortValue> {
        self.values.last()
    }

    pub fn into_values(self) -> Vec<SortValue> {
        self.values
    }

    // == Encode ==
    pub fn encode(&self) -> Result<String, PaginationError> {
        if self.values.is_empty() {
            return Err(PaginationError::InvalidCursor(
                "cursor carries no values".to_string(),
            ));
        }
        if !self.values.iter().all(SortValue::is_finite) {
            return Err(PaginationError::NonFiniteValue);
        }

        let payload = serde_json::to_vec(&CursorPayloadRef {
            v: CURSOR_VERSION,
            s: &self.sort,
            k: &self.values,
        })
        .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;

        let mut bytes = Vec::with_capacity(CHECKSUM_LEN + payload.len());
        bytes.extend_from_slice(&checksum(&payload));
        bytes.extend_from_slice(&payload);
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    // == Decode ==
    pub fn decode(token: &str) -> Result<Self, PaginationError> {
        if token.is_empty() {
            return Err(PaginationError::InvalidCursor("empty token".to_string()));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        if bytes.len() <= CHECKSUM_LEN {
            return Err(PaginationError::InvalidCursor("token truncated".to_string()));
        }

        let (sum, payload) = bytes.split_at(CHECKSUM_LEN);
        if sum != checksum(payload) {
            return Err(PaginationError::InvalidCursor(
                "checksum mismatch".to_string(),
            ));
        }

        let payload: CursorPayload = serde_json::from_slice(payload)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        if payload.v != CURSOR_VERSION {
            return Err(PaginationError::InvalidCursor(format!(
                "unsupported cursor version {}",
                payload.v
            )));
        }
        if payload.k.is_empty() {
            return Err(PaginationError::InvalidCursor(
                "cursor carries no values".to_string(),
            ));
        }

        if payload.s.is_empty() {
            return Err(PaginationError::InvalidCursor(
                "cursor carries no sort".to_string(),
            ));
        }

        Ok(Self {
            sort: payload.s,
            values: payload.k.into_iter().map(SortValue::normalized).collect(),
        })
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut sum = [0u8; CHECKSUM_LEN];
    sum.copy_from_slice(&digest[..CHECKSUM_LEN]);
    sum
}
