use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One approval record, stored as the hash `approval:<id>`.
///
/// Lifecycle: created pending, then resolved exactly once to approved,
/// denied, or timeout. The record auto-expires from storage after twice the
/// wait timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub action: String,
    pub zone: String,
    pub risk_level: String,
    pub description: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_content: Option<String>,
    pub status: ApprovalStatus,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl ApprovalRequest {
    pub(crate) fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.clone()),
            ("action".to_string(), self.action.clone()),
            ("zone".to_string(), self.zone.clone()),
            ("risk_level".to_string(), self.risk_level.clone()),
            ("description".to_string(), self.description.clone()),
            ("target".to_string(), self.target.clone()),
            ("status".to_string(), self.status.to_string()),
            ("created_at".to_string(), self.created_at.to_string()),
        ];
        if let Some(content) = &self.proposed_content {
            fields.push(("proposed_content".to_string(), content.clone()));
        }
        if let Some(at) = self.resolved_at {
            fields.push(("resolved_at".to_string(), at.to_string()));
        }
        if let Some(by) = &self.resolved_by {
            fields.push(("resolved_by".to_string(), by.clone()));
        }
        fields
    }

    pub(crate) fn from_map(map: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            id: map.get("id")?.clone(),
            action: map.get("action")?.clone(),
            zone: map.get("zone").cloned().unwrap_or_default(),
            risk_level: map.get("risk_level").cloned().unwrap_or_default(),
            description: map.get("description").cloned().unwrap_or_default(),
            target: map.get("target").cloned().unwrap_or_default(),
            proposed_content: map.get("proposed_content").cloned(),
            status: ApprovalStatus::parse(map.get("status")?)?,
            created_at: map.get("created_at")?.parse().ok()?,
            resolved_at: map.get("resolved_at").and_then(|v| v.parse().ok()),
            resolved_by: map.get("resolved_by").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Denied,
            ApprovalStatus::Timeout,
        ] {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApprovalStatus::parse("rejected"), None);
    }

    #[test]
    fn record_round_trips_through_fields() {
        let record = ApprovalRequest {
            id: "abc".into(),
            action: "skill:web_search".into(),
            zone: "external".into(),
            risk_level: "low".into(),
            description: "Execute skill 'web_search' for user u1".into(),
            target: "web_search".into(),
            proposed_content: Some("body".into()),
            status: ApprovalStatus::Pending,
            created_at: 1234.5,
            resolved_at: None,
            resolved_by: None,
        };
        let map: HashMap<String, String> = record.to_fields().into_iter().collect();
        let back = ApprovalRequest::from_map(&map).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.action, record.action);
        assert_eq!(back.status, ApprovalStatus::Pending);
        assert_eq!(back.created_at, 1234.5);
        assert_eq!(back.proposed_content.as_deref(), Some("body"));
        assert!(back.resolved_at.is_none());
    }

    #[test]
    fn from_map_rejects_incomplete_records() {
        let mut map = HashMap::new();
        map.insert("id".to_string(), "x".to_string());
        assert!(ApprovalRequest::from_map(&map).is_none());
    }
}
