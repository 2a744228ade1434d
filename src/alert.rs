use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// --- Canonical Schema ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitreTag {
    pub tactic: String,
    pub technique_id: String,
    pub technique_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAlert {
    pub id: String,
    pub timestamp: String,
    pub source: String,
    pub agent: AgentInfo,
    pub severity: u8,
    pub level: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub raw: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mitre: Option<MitreTag>,
}

/// Categorical level for a 0-15 rule severity.
pub fn severity_level(severity: u8) -> &'static str {
    match severity {
        0..=4 => "low",
        5..=6 => "medium",
        7..=11 => "high",
        _ => "critical",
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// --- Normalizer ---

/// Maps a raw upstream alert document into the canonical schema. Total:
/// every missing field has a default, and the original document is kept
/// verbatim under `raw`. The upstream's own id (if any) lives only there;
/// a fresh one is assigned here.
pub fn normalize(raw: Value) -> CanonicalAlert {
    let severity = raw
        .pointer("/rule/level")
        .and_then(Value::as_u64)
        .unwrap_or(0)
        .min(15) as u8;

    let category = raw
        .pointer("/rule/groups/0")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let title = raw
        .pointer("/rule/description")
        .and_then(Value::as_str)
        .unwrap_or("Unknown Alert")
        .to_string();

    let description = raw
        .get("full_log")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let agent = AgentInfo {
        name: raw
            .pointer("/agent/name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        ip: raw
            .pointer("/agent/ip")
            .and_then(Value::as_str)
            .unwrap_or("0.0.0.0")
            .to_string(),
    };

    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(now_rfc3339);

    CanonicalAlert {
        id: Uuid::new_v4().to_string(),
        timestamp,
        source: "wazuh".to_string(),
        agent,
        severity,
        level: severity_level(severity).to_string(),
        category,
        title,
        description,
        raw,
        mitre: None,
    }
}
