//! JSON wire frames exchanged with the reconciliation backend.
//!
//! The server pushes partial state snapshots and answers range fetches over
//! one bidirectional channel. Snapshots are deltas: a key that is absent
//! means "unchanged", never "cleared". Row payloads travel as raw JSON
//! values; the sync state owning a list decodes them into its row type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{Generation, GenerationAndCount};
use crate::model::{CandidatesData, ListKind};

/// Partial state snapshot pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<GenerationAndCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncleared: Option<GenerationAndCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<GenerationAndCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<GenerationAndCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates_generation: Option<Generation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<CandidatesData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_filenames: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
}

impl StateDelta {
    pub fn list(&self, kind: ListKind) -> Option<GenerationAndCount> {
        match kind {
            ListKind::Pending => self.pending,
            ListKind::Uncleared => self.uncleared,
            ListKind::Invalid => self.invalid,
            ListKind::Errors => self.errors,
        }
    }

    pub fn set_list(&mut self, kind: ListKind, value: GenerationAndCount) {
        match kind {
            ListKind::Pending => self.pending = Some(value),
            ListKind::Uncleared => self.uncleared = Some(value),
            ListKind::Invalid => self.invalid = Some(value),
            ListKind::Errors => self.errors = Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    State(StateDelta),
    RangeResult {
        list: ListKind,
        request_id: u64,
        generation: Generation,
        start: u64,
        rows: Vec<serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    FetchRange {
        list: ListKind,
        request_id: u64,
        start: u64,
        end: u64,
    },
    SkipTo {
        list: ListKind,
        index: u64,
    },
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, WireError> {
    serde_json::to_string(frame).map_err(WireError::Encode)
}

pub fn decode_server_frame(text: &str) -> Result<ServerFrame, WireError> {
    serde_json::from_str(text).map_err(WireError::Decode)
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, WireError> {
    serde_json::to_string(frame).map_err(WireError::Encode)
}

pub fn decode_client_frame(text: &str) -> Result<ClientFrame, WireError> {
    serde_json::from_str(text).map_err(WireError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_omits_absent_keys() {
        let delta = StateDelta {
            pending: Some(GenerationAndCount(2, 50)),
            message: Some("loaded".into()),
            ..StateDelta::default()
        };
        let encoded = encode_server_frame(&ServerFrame::State(delta.clone())).unwrap();
        assert!(encoded.contains("\"pending\":[2,50]"));
        assert!(!encoded.contains("uncleared"));
        assert!(!encoded.contains("closed"));

        match decode_server_frame(&encoded).unwrap() {
            ServerFrame::State(decoded) => assert_eq!(decoded, delta),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn delta_tolerates_unknown_keys() {
        let text = r#"{"type":"state","pending":[1,3],"unrelated_future_key":true}"#;
        match decode_server_frame(text).unwrap() {
            ServerFrame::State(delta) => {
                assert_eq!(delta.pending, Some(GenerationAndCount(1, 3)));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn range_result_round_trip() {
        let frame = ServerFrame::RangeResult {
            list: ListKind::Errors,
            request_id: 9,
            generation: 4,
            start: 10,
            rows: vec![serde_json::json!({"message": "oops"})],
        };
        let encoded = encode_server_frame(&frame).unwrap();
        assert!(encoded.contains("\"type\":\"range_result\""));
        assert!(encoded.contains("\"list\":\"errors\""));
        assert_eq!(decode_server_frame(&encoded).unwrap(), frame);
    }

    #[test]
    fn client_frames_round_trip() {
        let fetch = ClientFrame::FetchRange {
            list: ListKind::Pending,
            request_id: 1,
            start: 0,
            end: 20,
        };
        let encoded = encode_client_frame(&fetch).unwrap();
        assert_eq!(decode_client_frame(&encoded).unwrap(), fetch);

        let skip = ClientFrame::SkipTo {
            list: ListKind::Pending,
            index: 7,
        };
        let encoded = encode_client_frame(&skip).unwrap();
        assert_eq!(decode_client_frame(&encoded).unwrap(), skip);
    }
}
