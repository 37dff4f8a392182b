//! Audit stamping for decided requests.
//!
//! Every decision can carry an audit id and a content hash of the request
//! it was made for, so a persisted precedent or an external audit log can
//! be tied back to the exact input.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::judgment::{Action, CriticJudgment};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStamp {
    pub audit_id: String,
    /// Hex-encoded SHA-256 of the canonical JSON request.
    pub input_hash: String,
}

impl AuditStamp {
    pub fn for_request(request: &Value) -> Self {
        let serialized = request.to_string();
        let digest = Sha256::digest(serialized.as_bytes());
        Self {
            audit_id: format!("AUD-{}", Uuid::new_v4()),
            input_hash: hex::encode(digest),
        }
    }
}

/// Derive retrieval tags from the judgments and the decided action:
/// `<critic>:principle` when a principle was named, `<critic>:mitigation`
/// when a mitigation was proposed, and `outcome:<action>`.
pub fn build_tags(judgments: &HashMap<String, CriticJudgment>, action: Action) -> Vec<String> {
    let mut tags = Vec::new();
    let mut critics: Vec<&String> = judgments.keys().collect();
    critics.sort();
    for name in critics {
        let judgment = &judgments[name];
        if judgment.has_principle() {
            tags.push(format!("{name}:principle"));
        }
        if !judgment.mitigation.is_empty() {
            tags.push(format!("{name}:mitigation"));
        }
    }
    tags.push(format!("outcome:{action}"));
    tags
}
