use anyhow::Context;
use async_trait::async_trait;
use lazy_regex::regex;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;

/// Action names counted as a product view. Ingestion is owned elsewhere and
/// has renamed this event more than once, so all known synonyms are accepted.
pub const VIEW_ACTIONS: [&str; 4] = ["view", "view_item", "product_view", "page_view"];

#[derive(Clone, Debug)]
pub struct ActivityEvent {
    pub id: i64,
    pub action: String,
    /// Raw metadata as written by the ingestion side. Shape is not
    /// guaranteed: a JSON object, a JSON-encoded string, or missing.
    pub metadata: Option<String>,
    pub page_path: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActivityEvent {
    pub fn payload(&self) -> EventPayload {
        EventPayload::parse(self.metadata.as_deref())
    }
}

/// Explicit shape switch over the loosely typed metadata column.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Structured(serde_json::Map<String, serde_json::Value>),
    Encoded(String),
    Absent,
}

impl EventPayload {
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return EventPayload::Absent,
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => EventPayload::Structured(map),
            // подвійно закодований payload — рядок, всередині якого JSON
            Ok(serde_json::Value::String(inner)) => EventPayload::Encoded(inner),
            Ok(_) => EventPayload::Absent,
            Err(_) => EventPayload::Encoded(raw.to_string()),
        }
    }
}

/// Extracts a product id from one behavioral event. Never fails: anything
/// that cannot be read as a positive integer id yields `None`.
pub fn product_id_from_event(event: &ActivityEvent) -> Option<i64> {
    if !VIEW_ACTIONS.contains(&event.action.trim().to_lowercase().as_str()) {
        return None;
    }
    let from_payload = match event.payload() {
        EventPayload::Structured(map) => id_from_map(&map),
        EventPayload::Encoded(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => id_from_map(&map),
            _ => id_from_text(&text),
        },
        EventPayload::Absent => None,
    };
    from_payload.or_else(|| event.page_path.as_deref().and_then(id_from_path))
}

fn id_from_map(map: &serde_json::Map<String, serde_json::Value>) -> Option<i64> {
    ["item_id", "product_id"]
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(id_from_value)
}

fn id_from_value(value: &serde_json::Value) -> Option<i64> {
    let id = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.filter(|id| *id > 0)
}

// Остання лінія оборони: груба вижимка числа біля відомого ключа.
// Lossy on purpose; only reached when the payload is not valid JSON.
fn id_from_text(text: &str) -> Option<i64> {
    let re = regex!(r#"(?:item_id|product_id)\D{0,8}?(\d+)"#);
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

fn id_from_path(path: &str) -> Option<i64> {
    let re = regex!(r#"^/(?:product|buy)/(\d+)/?(?:[?#].*)?$"#);
    re.captures(path.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    /// Most recent `limit` view events, newest first.
    async fn recent_views(&self, limit: usize) -> anyhow::Result<Vec<ActivityEvent>>;
    async fn record(
        &self,
        action: &str,
        metadata: Option<&str>,
        page_path: Option<&str>,
    ) -> anyhow::Result<()>;
}

pub struct SqliteActivityLogRepository {
    conn: Connection,
}

impl SqliteActivityLogRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS activity_event (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    action TEXT NOT NULL,
                    metadata TEXT,
                    page_path TEXT,
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS activity_event_action_idx
                 ON activity_event(action, id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ActivityLogRepository for SqliteActivityLogRepository {
    async fn recent_views(&self, limit: usize) -> anyhow::Result<Vec<ActivityEvent>> {
        self.conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT id, action, metadata, page_path, created_at
                     FROM activity_event WHERE action IN (",
                );
                for (idx, _) in VIEW_ACTIONS.iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                }
                sql.push_str(") ORDER BY id DESC LIMIT ?");
                let mut params: Vec<rusqlite::types::Value> = VIEW_ACTIONS
                    .iter()
                    .map(|a| a.to_string().into())
                    .collect();
                params.push((limit as i64).into());
                let mut stmt = conn.prepare(&sql)?;
                let events = stmt
                    .query_map(rusqlite::params_from_iter(params), |row| {
                        let created_at: i64 = row.get(4)?;
                        Ok(ActivityEvent {
                            id: row.get(0)?,
                            action: row.get(1)?,
                            metadata: row.get(2)?,
                            page_path: row.get(3)?,
                            created_at: OffsetDateTime::from_unix_timestamp(created_at)
                                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(events)
            })
            .await
            .context("Unable to read activity log")
    }

    async fn record(
        &self,
        action: &str,
        metadata: Option<&str>,
        page_path: Option<&str>,
    ) -> anyhow::Result<()> {
        let action = action.to_string();
        let metadata = metadata.map(str::to_string);
        let page_path = page_path.map(str::to_string);
        self.conn
            .call(move |conn| {
                let now = OffsetDateTime::now_utc().unix_timestamp().max(0);
                conn.execute(
                    "INSERT INTO activity_event (action, metadata, page_path, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![action, metadata, page_path, now],
                )?;
                Ok(())
            })
            .await
            .context("Unable to record activity event")
    }
}
