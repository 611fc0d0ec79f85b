//! Row and candidate value types for the synchronized lists.
//!
//! Rows are opaque to the sync core: they are decoded from the wire, cached
//! by `(generation, index)`, and handed to consumers unchanged. Every field
//! is defaulted so the client stays tolerant of server-side additions.

use serde::{Deserialize, Serialize};

/// The named server-resident lists the client mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Pending,
    Uncleared,
    Invalid,
    Errors,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [
        ListKind::Pending,
        ListKind::Uncleared,
        ListKind::Invalid,
        ListKind::Errors,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ListKind::Pending => "pending",
            ListKind::Uncleared => "uncleared",
            ListKind::Invalid => "invalid",
            ListKind::Errors => "errors",
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in a journal file, used to cross-reference rows into sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub line: u64,
}

/// An imported entry awaiting reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingEntry {
    pub date: String,
    pub formatted: String,
    pub info: Option<SourceLocation>,
}

/// A journal posting that has not been cleared against imported data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnclearedPosting {
    pub account: String,
    pub date: String,
    pub narration: String,
    pub source: Option<SourceLocation>,
}

/// A journal directive referencing data that does not exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidReference {
    pub transaction: String,
    pub num_extra: u64,
    pub source: Option<SourceLocation>,
}

/// A parse or validation error reported for a journal file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalError {
    pub severity: String,
    pub message: String,
    pub source: Option<SourceLocation>,
}

/// One proposed match for the currently selected pending entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Candidate {
    pub formatted: String,
    pub accounts: Vec<String>,
}

/// The candidates singleton. Only meaningful together with the
/// `candidates_generation` and `pending_index` delivered alongside it;
/// consumers fence on that pair before rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidatesData {
    pub candidates: Vec<Candidate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_kind_wire_names() {
        for kind in ListKind::ALL {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
            let decoded: ListKind = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn rows_decode_from_sparse_objects() {
        let entry: PendingEntry = serde_json::from_str("{}").unwrap();
        assert_eq!(entry, PendingEntry::default());

        let error: JournalError = serde_json::from_str(
            r#"{"severity":"error","message":"bad directive","source":{"filename":"a.journal","line":12}}"#,
        )
        .unwrap();
        assert_eq!(error.message, "bad directive");
        assert_eq!(error.source.unwrap().line, 12);
    }
}
