//! Raw-layer records and the provenance stamp carried by every row derived
//! from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LakeError;

/// One unprocessed source payload, staged for replay.
///
/// Append-only: never mutated after insert. Selected by `(table, params)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Monotonic id assigned by the store on insert.
    pub id: u64,
    /// Serialized collection-scope descriptor (see [`encode_params`]).
    pub params: String,
    /// Opaque payload as received from the source.
    pub data: Vec<u8>,
    /// Request URL that produced this payload.
    pub url: String,
    /// Serialized parent entity the collector iterated over, if any.
    pub input: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A record waiting to be inserted; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRawRecord {
    pub params: String,
    pub data: Vec<u8>,
    pub url: String,
    pub input: Option<String>,
}

impl NewRawRecord {
    pub fn new(params: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            params: params.into(),
            data: data.into(),
            url: String::new(),
            input: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

impl RawRecord {
    /// Decode the payload as JSON into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Decode the collector input as JSON into `T`.
    pub fn decode_input<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        self.input.as_deref().map(serde_json::from_str).transpose()
    }
}

/// Serialize a collection-scope descriptor into the canonical params string.
///
/// Field order follows the struct declaration, so equal descriptors always
/// produce byte-equal strings.
pub fn encode_params<P: Serialize>(params: &P) -> Result<String, LakeError> {
    Ok(serde_json::to_string(params)?)
}

/// Where a tool or domain row came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDataOrigin {
    pub raw_data_params: String,
    pub raw_data_table: String,
    pub raw_data_id: u64,
    pub raw_data_remark: String,
}

impl RawDataOrigin {
    pub fn from_raw(table: &str, record: &RawRecord) -> Self {
        Self {
            raw_data_params: record.params.clone(),
            raw_data_table: table.to_string(),
            raw_data_id: record.id,
            raw_data_remark: String::new(),
        }
    }

    /// True when this row belongs to the given collection scope.
    pub fn in_scope(&self, table: &str, params: &str) -> bool {
        self.raw_data_table == table && self.raw_data_params == params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Params {
        connection_id: u64,
        owner: &'static str,
        repo: &'static str,
    }

    #[test]
    fn params_encoding_is_stable() {
        let p = Params { connection_id: 1, owner: "apache", repo: "lake" };
        let a = encode_params(&p).unwrap();
        let b = encode_params(&p).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"connection_id":1,"owner":"apache","repo":"lake"}"#);
    }

    #[test]
    fn origin_scope_matches_table_and_params() {
        let record = RawRecord {
            id: 7,
            params: "{\"connection_id\":1}".into(),
            data: b"{}".to_vec(),
            url: String::new(),
            input: None,
            created_at: Utc::now(),
        };
        let origin = RawDataOrigin::from_raw("_raw_jobs", &record);
        assert_eq!(origin.raw_data_id, 7);
        assert!(origin.in_scope("_raw_jobs", "{\"connection_id\":1}"));
        assert!(!origin.in_scope("_raw_runs", "{\"connection_id\":1}"));
        assert!(!origin.in_scope("_raw_jobs", "{\"connection_id\":2}"));
    }

    #[test]
    fn decode_input_handles_absent_input() {
        let mut record = RawRecord {
            id: 1,
            params: String::new(),
            data: br#"{"id":3}"#.to_vec(),
            url: String::new(),
            input: None,
            created_at: Utc::now(),
        };
        let input: Option<serde_json::Value> = record.decode_input().unwrap();
        assert!(input.is_none());

        record.input = Some(r#"{"run_id":9}"#.into());
        let input: Option<serde_json::Value> = record.decode_input().unwrap();
        assert_eq!(input.unwrap()["run_id"], 9);
        let data: serde_json::Value = record.decode().unwrap();
        assert_eq!(data["id"], 3);
    }
}
