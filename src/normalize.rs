//! Turns backend event records into [`NormalizedEvent`]s.
//!
//! Backend rows are inconsistent: field names come in snake_case or
//! camelCase, and `event_time` may be a Postgres `timetz` literal carrying a
//! bogus date (`"0001-01-01 18:00:00+00 BC"`), an ISO timestamp, or nothing at
//! all. Every path here degrades to a default instead of failing.

use std::cmp::Ordering;

use chrono::{
    DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::{EventStatus, NormalizedEvent};

static CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2}):(\d{2})").expect("valid clock regex"));

const ID_KEYS: &[&str] = &["id"];
const TITLE_KEYS: &[&str] = &["title", "name"];
const DESCRIPTION_KEYS: &[&str] = &["description"];
const TYPE_KEYS: &[&str] = &["event_type", "eventType", "type"];
const LOCATION_KEYS: &[&str] = &["location"];
const DATE_KEYS: &[&str] = &["event_date", "eventDate"];
const TIME_KEYS: &[&str] = &["event_time", "eventTime"];
const ACTIVE_KEYS: &[&str] = &["is_active", "isActive"];
const ATTENDEE_KEYS: &[&str] = &["current_attendees", "currentAttendees"];
const CAPACITY_KEYS: &[&str] = &["max_attendees", "maxAttendees"];
const CREATOR_KEYS: &[&str] = &["created_by", "createdBy"];
const IMAGE_KEYS: &[&str] = &["image_url", "imageUrl"];

const NAIVE_TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y/%m/%d %H:%M"];

/// Normalizes with the machine's local zone.
pub fn normalize(raw: Option<&Value>) -> Option<NormalizedEvent> {
    EventNormalizer::local().normalize(raw)
}

pub fn normalize_many(raw: Option<&Value>) -> Vec<NormalizedEvent> {
    EventNormalizer::local().normalize_many(raw)
}

/// Normalizer bound to the zone that defines "today" and local wall-clock
/// times. Temples may sit in a different zone than the machine running this.
#[derive(Debug, Clone)]
pub struct EventNormalizer<Z: TimeZone = Local> {
    zone: Z,
}

impl EventNormalizer<Local> {
    pub fn local() -> Self {
        Self { zone: Local }
    }
}

impl Default for EventNormalizer<Local> {
    fn default() -> Self {
        Self::local()
    }
}

impl<Z: TimeZone> EventNormalizer<Z> {
    pub fn new(zone: Z) -> Self {
        Self { zone }
    }

    pub fn normalize(&self, raw: Option<&Value>) -> Option<NormalizedEvent> {
        self.normalize_at(raw, self.now())
    }

    pub fn normalize_many(&self, raw: Option<&Value>) -> Vec<NormalizedEvent> {
        self.normalize_many_at(raw, self.now())
    }

    /// Same as [`normalize_many`](Self::normalize_many) with an explicit
    /// clock. Non-array input yields nothing; `null` entries are dropped.
    pub fn normalize_many_at(
        &self,
        raw: Option<&Value>,
        now: DateTime<Z>,
    ) -> Vec<NormalizedEvent> {
        match raw {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| self.normalize_at(Some(item), now.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn normalize_at(&self, raw: Option<&Value>, now: DateTime<Z>) -> Option<NormalizedEvent> {
        let raw = match raw {
            None | Some(Value::Null) => return None,
            Some(value) => value,
        };

        let time = self.extract_time(pick(raw, TIME_KEYS));
        let event_time = time.format("%H:%M").to_string();
        let event_date = self.assemble_date(pick(raw, DATE_KEYS), &event_time, &now);
        let status = derive_status(
            event_date.with_timezone(&self.zone).date_naive(),
            now.date_naive(),
        );

        Some(NormalizedEvent {
            id: pick(raw, ID_KEYS).cloned().unwrap_or(Value::Null),
            title: scalar_string(pick(raw, TITLE_KEYS)),
            description: scalar_string(pick(raw, DESCRIPTION_KEYS)),
            event_type: scalar_string(pick(raw, TYPE_KEYS)),
            location: scalar_string(pick(raw, LOCATION_KEYS)),
            event_date,
            event_time,
            is_active: !matches!(pick(raw, ACTIVE_KEYS), Some(Value::Bool(false))),
            status,
            current_attendees: parse_count(pick(raw, ATTENDEE_KEYS)).unwrap_or(0),
            max_attendees: parse_count(pick(raw, CAPACITY_KEYS)),
            created_by: scalar_string(pick(raw, CREATOR_KEYS)),
            image_url: scalar_string(pick(raw, IMAGE_KEYS)),
        })
    }

    fn now(&self) -> DateTime<Z> {
        Utc::now().with_timezone(&self.zone)
    }

    /// Wall-clock time of day. The first valid `H:MM:SS` run wins; anything
    /// around it (date, offset, era) is ignored.
    fn extract_time(&self, value: Option<&Value>) -> NaiveTime {
        let Some(value) = value else {
            return NaiveTime::MIN;
        };
        let text = stringify(value);
        let from_clock = CLOCK_RE.captures_iter(&text).find_map(|caps| {
            let hour = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let minute = caps.get(2)?.as_str().parse::<u32>().ok()?;
            NaiveTime::from_hms_opt(hour, minute, 0)
        });

        from_clock
            .or_else(|| self.parse_timestamp_time(value))
            .unwrap_or(NaiveTime::MIN)
    }

    fn parse_timestamp_time(&self, value: &Value) -> Option<NaiveTime> {
        let time = if let Some(millis) = value.as_i64() {
            let instant = Utc.timestamp_millis_opt(millis).single()?;
            instant.with_timezone(&self.zone).time()
        } else {
            let text = value.as_str()?.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                dt.with_timezone(&self.zone).time()
            } else if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
                dt.with_timezone(&self.zone).time()
            } else {
                NAIVE_TIMESTAMP_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())?
                    .time()
            }
        };
        NaiveTime::from_hms_opt(time.hour(), time.minute(), 0)
    }

    /// `{date}T{HH:MM}:00` read in the normalizer's zone, or the current
    /// instant when that string does not name a real local time.
    fn assemble_date(
        &self,
        value: Option<&Value>,
        event_time: &str,
        now: &DateTime<Z>,
    ) -> DateTime<FixedOffset> {
        let date_part = match value {
            None | Some(Value::Null) => now.date_naive().format("%Y-%m-%d").to_string(),
            Some(value) => {
                let text = stringify(value);
                text.split('T').next().unwrap_or_default().trim().to_string()
            }
        };

        let candidate = format!("{date_part}T{event_time}:00");
        NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .and_then(|naive| localize(&self.zone, naive))
            .unwrap_or_else(|| now.fixed_offset())
    }
}

fn localize<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.fixed_offset()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.fixed_offset()),
        LocalResult::None => None,
    }
}

pub fn derive_status(event_day: NaiveDate, today: NaiveDate) -> EventStatus {
    match event_day.cmp(&today) {
        Ordering::Greater => EventStatus::Upcoming,
        Ordering::Equal => EventStatus::Ongoing,
        Ordering::Less => EventStatus::Completed,
    }
}

/// First alias present in the object. A JSON `null` still counts as present.
fn pick<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| raw.get(*key))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_count(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.max(0.0) as u64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<u64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.max(0.0) as u64)
            })
        }
        _ => None,
    }
}
