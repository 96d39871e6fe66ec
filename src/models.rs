use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
}

/// Canonical event shape handed to dashboards and lists.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub id: Value,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub location: Option<String>,
    pub event_date: DateTime<FixedOffset>,
    pub event_time: String, // HH:MM, 24-hour
    pub is_active: bool,
    pub status: EventStatus,
    pub current_attendees: u64,
    pub max_attendees: Option<u64>,
    pub created_by: Option<String>,
    pub image_url: Option<String>,
}

impl NormalizedEvent {
    /// Backend ids arrive as either strings or integers.
    pub fn id_key(&self) -> Option<String> {
        match &self.id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| "Untitled Event".to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Seva {
    pub id: RecordId,
    #[serde(alias = "title", alias = "seva_name", alias = "sevaName")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "amount")]
    pub price: Option<f64>,
    #[serde(default, alias = "duration_minutes")]
    pub duration_minutes: Option<u32>,
    #[serde(default = "default_true", alias = "is_active")]
    pub is_active: bool,
    #[serde(default, alias = "entity_id")]
    pub entity_id: Option<RecordId>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: RecordId,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "donor_name")]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default, alias = "donated_at", alias = "created_at", alias = "createdAt")]
    pub donated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantUser {
    pub id: RecordId,
    #[serde(alias = "full_name", alias = "name")]
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_true", alias = "is_active")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}
