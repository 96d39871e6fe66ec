use chrono::Utc;
use rusqlite::{params, Connection};

use crate::models::NormalizedEvent;
use crate::utils;

/// Last successfully fetched event list per tenant.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open_default() -> rusqlite::Result<Self> {
        let path = utils::database_path();
        if let Err(err) = utils::ensure_parent(&path) {
            tracing::warn!(path = %path.display(), "cannot create cache directory: {err}");
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                tenant_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                event_id TEXT,
                payload TEXT NOT NULL,
                fetched_at_utc TEXT NOT NULL,
                PRIMARY KEY (tenant_id, position)
            );
            CREATE INDEX IF NOT EXISTS events_by_id ON events(tenant_id, event_id);",
        )?;
        Ok(())
    }

    /// Swaps the tenant's cached list for `events`, keeping their order.
    pub fn replace_events(
        &mut self,
        tenant_id: &str,
        events: &[NormalizedEvent],
    ) -> rusqlite::Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM events WHERE tenant_id = ?1", params![tenant_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (tenant_id, position, event_id, payload, fetched_at_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, event) in events.iter().enumerate() {
                let payload = serde_json::to_string(event)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                stmt.execute(params![
                    tenant_id,
                    position as i64,
                    event.id_key(),
                    payload,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn list_events(&self, tenant_id: &str) -> rusqlite::Result<Vec<NormalizedEvent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM events WHERE tenant_id = ?1 ORDER BY position")?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            let payload: String = row.get(0)?;
            decode_payload(payload)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_event(&self, tenant_id: &str, event_id: &str) -> rusqlite::Result<NormalizedEvent> {
        let payload: String = self.conn.query_row(
            "SELECT payload FROM events WHERE tenant_id = ?1 AND event_id = ?2
             ORDER BY position LIMIT 1",
            params![tenant_id, event_id],
            |row| row.get(0),
        )?;
        decode_payload(payload)
    }

    pub fn clear(&self, tenant_id: &str) -> rusqlite::Result<usize> {
        self.conn
            .execute("DELETE FROM events WHERE tenant_id = ?1", params![tenant_id])
    }
}

fn decode_payload(payload: String) -> rusqlite::Result<NormalizedEvent> {
    serde_json::from_str(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            payload.len(),
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::EventNormalizer;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_events() -> Vec<NormalizedEvent> {
        let raw = json!([
            { "id": 2, "title": "Maha Shivaratri", "event_date": "2025-02-26", "event_time": "18:30:00" },
            { "id": "abc", "title": "Annadanam", "event_date": "2025-03-01" },
        ]);
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        EventNormalizer::new(Utc).normalize_many_at(Some(&raw), now)
    }

    #[test]
    fn round_trips_events_per_tenant() {
        let mut store = Store::open_in_memory().expect("open store");
        let events = sample_events();
        assert_eq!(store.replace_events("t-1", &events).unwrap(), 2);

        let cached = store.list_events("t-1").unwrap();
        assert_eq!(cached, events);
        assert!(store.list_events("t-2").unwrap().is_empty());

        let found = store.get_event("t-1", "2").unwrap();
        assert_eq!(found.title.as_deref(), Some("Maha Shivaratri"));
        assert_eq!(found.event_time, "18:30");
    }

    #[test]
    fn replace_drops_stale_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let events = sample_events();
        store.replace_events("t-1", &events).unwrap();
        store.replace_events("t-1", &events[1..]).unwrap();

        let cached = store.list_events("t-1").unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, json!("abc"));
        assert!(matches!(
            store.get_event("t-1", "2"),
            Err(rusqlite::Error::QueryReturnedNoRows)
        ));

        assert_eq!(store.clear("t-1").unwrap(), 1);
        assert!(store.list_events("t-1").unwrap().is_empty());
    }

    #[test]
    fn keeps_rows_without_or_sharing_ids() {
        let raw = json!([
            { "id": 7, "title": "First", "event_date": "2025-04-10" },
            { "title": "No id", "event_date": "2025-04-11" },
            { "id": 7, "title": "Second", "event_date": "2025-04-12" },
            { "id": null, "title": "Null id", "event_date": "2025-04-13" },
        ]);
        let now = Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap();
        let events = EventNormalizer::new(Utc).normalize_many_at(Some(&raw), now);

        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.replace_events("t-1", &events).unwrap(), 4);

        let cached = store.list_events("t-1").unwrap();
        let titles: Vec<_> = cached.iter().map(NormalizedEvent::title).collect();
        assert_eq!(titles, vec!["First", "No id", "Second", "Null id"]);
        assert_eq!(store.get_event("t-1", "7").unwrap().title(), "First");
    }
}
