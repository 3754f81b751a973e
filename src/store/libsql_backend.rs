//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::campaigns::model::{
    Campaign, CampaignCounters, CampaignStatus, CampaignType, DeliveryStatus, Recipient,
};
use crate::error::DatabaseError;
use crate::leads::{
    EmailTemplate, Lead, LeadList, LeadListUpdate, LeadTag, ListEntry, ListItem, ListItemUpdate,
    UserSettings,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for plain statements.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use,
/// but a transaction on it would swallow other tasks' writes, so
/// transactions run on a connection of their own.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// In-memory databases are private to one connection, so their
    /// transactions have to use `conn`.
    in_memory: bool,
    /// One transaction at a time.
    tx_lock: Mutex<()>,
}

const BUSY_TIMEOUT_MS: u32 = 5_000;

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db, false).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Open(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db, true).await
    }

    async fn from_database(db: LibSqlDatabase, in_memory: bool) -> Result<Self, DatabaseError> {
        let conn = open_connection(&db).await?;
        let backend = Self {
            db: Arc::new(db),
            conn,
            in_memory,
            tx_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Connection for a transaction. Hold `tx_lock` while using it.
    async fn tx_conn(&self) -> Result<Connection, DatabaseError> {
        if self.in_memory {
            return Ok(self.conn.clone());
        }
        open_connection(&self.db).await
    }
}

/// Connect with foreign keys enforced and a busy timeout, so writers on
/// different connections wait for each other instead of failing.
async fn open_connection(db: &LibSqlDatabase) -> Result<Connection, DatabaseError> {
    let conn = db
        .connect()
        .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .await
        .map_err(|e| DatabaseError::Open(format!("Failed to enable foreign keys: {e}")))?;
    conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
        .await
        .map_err(|e| DatabaseError::Open(format!("Failed to set busy timeout: {e}")))?;
    Ok(conn)
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_real(v: Option<f64>) -> libsql::Value {
    v.map_or(libsql::Value::Null, libsql::Value::Real)
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    v.map_or(libsql::Value::Null, libsql::Value::Integer)
}

/// Map a libsql error, promoting constraint failures.
fn query_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint") || msg.contains("FOREIGN KEY constraint") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Drain a result set through a row mapper, skipping rows that fail to parse.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(|e| query_err(op, e))? {
        match map(&row) {
            Ok(v) => out.push(v),
            Err(e) => warn!("Skipping {op} row: {e}"),
        }
    }
    Ok(out)
}

/// Read the first row through a mapper.
async fn first_row<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => map(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
        Ok(None) => Ok(None),
        Err(e) => Err(query_err(op, e)),
    }
}

/// The statements of `insert_campaign`, run inside its transaction.
async fn insert_campaign_rows(
    conn: &Connection,
    campaign: &Campaign,
    recipients: &[Recipient],
) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO campaigns ({CAMPAIGN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            campaign.id.to_string(),
            campaign.user_id.as_str(),
            campaign.list_id.to_string(),
            campaign.name.as_str(),
            campaign.campaign_type.to_string(),
            campaign.status.to_string(),
            opt_text(campaign.subject.as_deref()),
            opt_text(campaign.body.as_deref()),
            opt_text(campaign.call_script.as_deref()),
            opt_text(campaign.call_notes.as_deref()),
            i64::from(campaign.counters.total),
            i64::from(campaign.counters.sent),
            i64::from(campaign.counters.failed),
            campaign.created_at.to_rfc3339(),
            campaign.updated_at.to_rfc3339(),
            opt_text(campaign.completed_at.map(|t| t.to_rfc3339()).as_deref()),
        ],
    )
    .await
    .map_err(|e| query_err("insert_campaign", e))?;

    for r in recipients {
        conn.execute(
            &format!(
                "INSERT INTO campaign_recipients ({RECIPIENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                r.id.to_string(),
                campaign.id.to_string(),
                r.lead_id.to_string(),
                r.place_id.as_str(),
                r.company_name.as_str(),
                r.address.as_str(),
                opt_text(r.phone.as_deref()),
                opt_text(r.website.as_deref()),
                opt_text(r.email.as_deref()),
                r.status.to_string(),
                opt_text(r.error.as_deref()),
                opt_text(r.notes.as_deref()),
                opt_text(r.sent_at.map(|t| t.to_rfc3339()).as_deref()),
                r.created_at.to_rfc3339(),
                r.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| query_err("insert_campaign recipient", e))?;
    }
    Ok(())
}

const LEAD_COLUMNS: &str = "id, place_id, name, formatted_address, website, phone, rating, total_ratings, flags, notes, created_at, updated_at";

const LIST_COLUMNS: &str = "id, user_id, name, description, is_archived, created_at, updated_at";

const CAMPAIGN_COLUMNS: &str = "id, user_id, list_id, name, campaign_type, status, subject, body, call_script, call_notes, total, sent, failed, created_at, updated_at, completed_at";

const RECIPIENT_COLUMNS: &str = "id, campaign_id, lead_id, place_id, company_name, address, phone, website, email, status, error, notes, sent_at, created_at, updated_at";

/// Map lead columns starting at `offset` (list joins prepend item columns).
fn lead_at(row: &libsql::Row, offset: i32) -> Result<Lead, libsql::Error> {
    let id: String = row.get(offset)?;
    let flags: String = row.get::<String>(offset + 8).unwrap_or_else(|_| "[]".into());
    let created: String = row.get(offset + 10)?;
    let updated: String = row.get(offset + 11)?;
    Ok(Lead {
        id: parse_uuid(&id),
        place_id: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        formatted_address: row.get(offset + 3)?,
        website: row.get::<String>(offset + 4).ok(),
        phone: row.get::<String>(offset + 5).ok(),
        rating: row.get::<f64>(offset + 6).ok(),
        total_ratings: row.get::<i64>(offset + 7).ok(),
        flags: serde_json::from_str(&flags).unwrap_or_default(),
        notes: row.get::<String>(offset + 9).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_lead(row: &libsql::Row) -> Result<Lead, libsql::Error> {
    lead_at(row, 0)
}

fn row_to_list(row: &libsql::Row) -> Result<LeadList, libsql::Error> {
    let id: String = row.get(0)?;
    let archived: i64 = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(LeadList {
        id: parse_uuid(&id),
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get::<String>(3).ok(),
        is_archived: archived != 0,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Item columns 0..7 followed by lead columns.
fn row_to_entry(row: &libsql::Row) -> Result<ListEntry, libsql::Error> {
    let id: String = row.get(0)?;
    let list_id: String = row.get(1)?;
    let lead_id: String = row.get(2)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(ListEntry {
        item: ListItem {
            id: parse_uuid(&id),
            list_id: parse_uuid(&list_id),
            lead_id: parse_uuid(&lead_id),
            notes: row.get::<String>(3).ok(),
            status: row.get(4)?,
            created_at: parse_datetime(&created),
            updated_at: parse_datetime(&updated),
        },
        lead: lead_at(row, 7)?,
    })
}

fn row_to_tag(row: &libsql::Row) -> Result<LeadTag, libsql::Error> {
    let id: String = row.get(0)?;
    let lead_id: String = row.get(1)?;
    let created: String = row.get(3)?;
    Ok(LeadTag {
        id: parse_uuid(&id),
        lead_id: parse_uuid(&lead_id),
        tag: row.get(2)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_template(row: &libsql::Row) -> Result<EmailTemplate, libsql::Error> {
    let id: String = row.get(0)?;
    let created: String = row.get(5)?;
    Ok(EmailTemplate {
        id: parse_uuid(&id),
        user_id: row.get(1)?,
        name: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_settings(row: &libsql::Row) -> Result<UserSettings, libsql::Error> {
    let updated: Option<String> = row.get::<String>(4).ok();
    Ok(UserSettings {
        user_id: row.get(0)?,
        gmail_access_token: row.get::<String>(1).ok(),
        gmail_refresh_token: row.get::<String>(2).ok(),
        gmail_token_expiry: row.get::<i64>(3).ok(),
        updated_at: parse_optional_datetime(&updated),
    })
}

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, libsql::Error> {
    let id: String = row.get(0)?;
    let list_id: String = row.get(2)?;
    let type_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let total: i64 = row.get(10)?;
    let sent: i64 = row.get(11)?;
    let failed: i64 = row.get(12)?;
    let created: String = row.get(13)?;
    let updated: String = row.get(14)?;
    let completed: Option<String> = row.get::<String>(15).ok();
    Ok(Campaign {
        id: parse_uuid(&id),
        user_id: row.get(1)?,
        list_id: parse_uuid(&list_id),
        name: row.get(3)?,
        campaign_type: type_str.parse().unwrap_or(CampaignType::Email),
        status: status_str.parse().unwrap_or(CampaignStatus::Draft),
        subject: row.get::<String>(6).ok(),
        body: row.get::<String>(7).ok(),
        call_script: row.get::<String>(8).ok(),
        call_notes: row.get::<String>(9).ok(),
        counters: CampaignCounters {
            total: total as u32,
            sent: sent as u32,
            failed: failed as u32,
        },
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
        completed_at: parse_optional_datetime(&completed),
    })
}

fn row_to_recipient(row: &libsql::Row) -> Result<Recipient, libsql::Error> {
    let id: String = row.get(0)?;
    let campaign_id: String = row.get(1)?;
    let lead_id: String = row.get(2)?;
    let status_str: String = row.get(9)?;
    let sent_at: Option<String> = row.get::<String>(12).ok();
    let created: String = row.get(13)?;
    let updated: String = row.get(14)?;
    Ok(Recipient {
        id: parse_uuid(&id),
        campaign_id: parse_uuid(&campaign_id),
        lead_id: parse_uuid(&lead_id),
        place_id: row.get(3)?,
        company_name: row.get(4)?,
        address: row.get(5)?,
        phone: row.get::<String>(6).ok(),
        website: row.get::<String>(7).ok(),
        email: row.get::<String>(8).ok(),
        status: status_str.parse().unwrap_or(DeliveryStatus::Pending),
        error: row.get::<String>(10).ok(),
        notes: row.get::<String>(11).ok(),
        sent_at: parse_optional_datetime(&sent_at),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_counters(row: &libsql::Row) -> Result<CampaignCounters, libsql::Error> {
    let total: i64 = row.get(0)?;
    let sent: i64 = row.get(1)?;
    let failed: i64 = row.get(2)?;
    Ok(CampaignCounters {
        total: total as u32,
        sent: sent as u32,
        failed: failed as u32,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn upsert_lead(&self, lead: &Lead) -> Result<Lead, DatabaseError> {
        let flags = serde_json::to_string(&lead.flags)
            .map_err(|e| DatabaseError::Serialization(format!("lead flags: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO leads (id, place_id, name, formatted_address, website, phone, rating, total_ratings, flags, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(place_id) DO UPDATE SET
                    name = excluded.name,
                    formatted_address = excluded.formatted_address,
                    website = excluded.website,
                    phone = excluded.phone,
                    rating = excluded.rating,
                    total_ratings = excluded.total_ratings,
                    flags = excluded.flags,
                    notes = excluded.notes,
                    updated_at = excluded.updated_at",
                params![
                    lead.id.to_string(),
                    lead.place_id.as_str(),
                    lead.name.as_str(),
                    lead.formatted_address.as_str(),
                    opt_text(lead.website.as_deref()),
                    opt_text(lead.phone.as_deref()),
                    opt_real(lead.rating),
                    opt_int(lead.total_ratings),
                    flags,
                    opt_text(lead.notes.as_deref()),
                    lead.created_at.to_rfc3339(),
                    lead.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("upsert_lead", e))?;

        debug!(place_id = %lead.place_id, "Lead saved");
        self.get_lead_by_place_id(&lead.place_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "lead".into(),
                id: lead.place_id.clone(),
            })
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_err("get_lead", e))?;
        first_row(rows, "get_lead", row_to_lead).await
    }

    async fn get_lead_by_place_id(&self, place_id: &str) -> Result<Option<Lead>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE place_id = ?1"),
                params![place_id],
            )
            .await
            .map_err(|e| query_err("get_lead_by_place_id", e))?;
        first_row(rows, "get_lead_by_place_id", row_to_lead).await
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads ORDER BY updated_at DESC"),
                (),
            )
            .await
            .map_err(|e| query_err("list_leads", e))?;
        collect_rows(rows, "list_leads", row_to_lead).await
    }

    async fn delete_lead(&self, place_id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute("DELETE FROM leads WHERE place_id = ?1", params![place_id])
            .await
            .map_err(|e| query_err("delete_lead", e))?;
        Ok(n > 0)
    }

    async fn update_lead_flags(&self, place_id: &str, flags: &[String]) -> Result<bool, DatabaseError> {
        let flags = serde_json::to_string(flags)
            .map_err(|e| DatabaseError::Serialization(format!("lead flags: {e}")))?;
        let n = self
            .conn()
            .execute(
                "UPDATE leads SET flags = ?1, updated_at = ?2 WHERE place_id = ?3",
                params![flags, Utc::now().to_rfc3339(), place_id],
            )
            .await
            .map_err(|e| query_err("update_lead_flags", e))?;
        Ok(n > 0)
    }

    async fn update_lead_notes(&self, place_id: &str, notes: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE leads SET notes = ?1, updated_at = ?2 WHERE place_id = ?3",
                params![notes, Utc::now().to_rfc3339(), place_id],
            )
            .await
            .map_err(|e| query_err("update_lead_notes", e))?;
        Ok(n > 0)
    }

    // ── Lists ───────────────────────────────────────────────────────

    async fn create_list(&self, list: &LeadList) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO lead_lists ({LIST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    list.id.to_string(),
                    list.user_id.as_str(),
                    list.name.as_str(),
                    opt_text(list.description.as_deref()),
                    i64::from(list.is_archived),
                    list.created_at.to_rfc3339(),
                    list.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("create_list", e))?;
        Ok(())
    }

    async fn get_list(&self, id: Uuid) -> Result<Option<LeadList>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LIST_COLUMNS} FROM lead_lists WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_err("get_list", e))?;
        first_row(rows, "get_list", row_to_list).await
    }

    async fn list_lists(&self, user_id: &str) -> Result<Vec<LeadList>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LIST_COLUMNS} FROM lead_lists WHERE user_id = ?1 AND is_archived = 0 ORDER BY created_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| query_err("list_lists", e))?;
        collect_rows(rows, "list_lists", row_to_list).await
    }

    async fn update_list(&self, id: Uuid, update: &LeadListUpdate) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE lead_lists SET name = COALESCE(?1, name), description = COALESCE(?2, description), updated_at = ?3 WHERE id = ?4",
                params![
                    opt_text(update.name.as_deref()),
                    opt_text(update.description.as_deref()),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| query_err("update_list", e))?;
        Ok(n > 0)
    }

    async fn archive_list(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE lead_lists SET is_archived = 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| query_err("archive_list", e))?;
        Ok(n > 0)
    }

    async fn add_list_item(&self, item: &ListItem) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO list_items (id, list_id, lead_id, notes, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    item.id.to_string(),
                    item.list_id.to_string(),
                    item.lead_id.to_string(),
                    opt_text(item.notes.as_deref()),
                    item.status.as_str(),
                    item.created_at.to_rfc3339(),
                    item.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("add_list_item", e))?;
        Ok(())
    }

    async fn list_entries(&self, list_id: Uuid) -> Result<Vec<ListEntry>, DatabaseError> {
        let lead_cols = LEAD_COLUMNS
            .split(", ")
            .map(|c| format!("l.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT li.id, li.list_id, li.lead_id, li.notes, li.status, li.created_at, li.updated_at, {lead_cols}
                     FROM list_items li JOIN leads l ON l.id = li.lead_id
                     WHERE li.list_id = ?1 ORDER BY li.created_at DESC, li.rowid DESC"
                ),
                params![list_id.to_string()],
            )
            .await
            .map_err(|e| query_err("list_entries", e))?;
        collect_rows(rows, "list_entries", row_to_entry).await
    }

    async fn update_list_item(&self, id: Uuid, update: &ListItemUpdate) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE list_items SET notes = COALESCE(?1, notes), status = COALESCE(?2, status), updated_at = ?3 WHERE id = ?4",
                params![
                    opt_text(update.notes.as_deref()),
                    opt_text(update.status.as_deref()),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| query_err("update_list_item", e))?;
        Ok(n > 0)
    }

    async fn remove_list_item(&self, list_id: Uuid, lead_id: Uuid) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "DELETE FROM list_items WHERE list_id = ?1 AND lead_id = ?2",
                params![list_id.to_string(), lead_id.to_string()],
            )
            .await
            .map_err(|e| query_err("remove_list_item", e))?;
        Ok(n > 0)
    }

    // ── Tags ────────────────────────────────────────────────────────

    async fn add_tag(&self, lead_id: Uuid, tag: &str) -> Result<LeadTag, DatabaseError> {
        let tag = LeadTag {
            id: Uuid::new_v4(),
            lead_id,
            tag: tag.trim().to_string(),
            created_at: Utc::now(),
        };
        self.conn()
            .execute(
                "INSERT INTO lead_tags (id, lead_id, tag, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    tag.id.to_string(),
                    lead_id.to_string(),
                    tag.tag.as_str(),
                    tag.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("add_tag", e))?;
        Ok(tag)
    }

    async fn remove_tag(&self, lead_id: Uuid, tag: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "DELETE FROM lead_tags WHERE lead_id = ?1 AND tag = ?2",
                params![lead_id.to_string(), tag.trim()],
            )
            .await
            .map_err(|e| query_err("remove_tag", e))?;
        Ok(n > 0)
    }

    async fn list_tags(&self, lead_id: Uuid) -> Result<Vec<LeadTag>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT id, lead_id, tag, created_at FROM lead_tags WHERE lead_id = ?1 ORDER BY created_at DESC",
                params![lead_id.to_string()],
            )
            .await
            .map_err(|e| query_err("list_tags", e))?;
        collect_rows(rows, "list_tags", row_to_tag).await
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn create_template(&self, template: &EmailTemplate) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO email_templates (id, user_id, name, subject, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    template.id.to_string(),
                    template.user_id.as_str(),
                    template.name.as_str(),
                    template.subject.as_str(),
                    template.body.as_str(),
                    template.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("create_template", e))?;
        Ok(())
    }

    async fn list_templates(&self, user_id: &str) -> Result<Vec<EmailTemplate>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, subject, body, created_at FROM email_templates WHERE user_id = ?1 ORDER BY created_at DESC",
                params![user_id],
            )
            .await
            .map_err(|e| query_err("list_templates", e))?;
        collect_rows(rows, "list_templates", row_to_template).await
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT user_id, gmail_access_token, gmail_refresh_token, gmail_token_expiry, updated_at FROM user_settings WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| query_err("get_user_settings", e))?;
        first_row(rows, "get_user_settings", row_to_settings).await
    }

    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_settings (user_id, gmail_access_token, gmail_refresh_token, gmail_token_expiry, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    gmail_access_token = excluded.gmail_access_token,
                    gmail_refresh_token = COALESCE(excluded.gmail_refresh_token, gmail_refresh_token),
                    gmail_token_expiry = excluded.gmail_token_expiry,
                    updated_at = excluded.updated_at",
                params![
                    settings.user_id.as_str(),
                    opt_text(settings.gmail_access_token.as_deref()),
                    opt_text(settings.gmail_refresh_token.as_deref()),
                    opt_int(settings.gmail_token_expiry),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("upsert_user_settings", e))?;
        debug!(user_id = %settings.user_id, "User settings saved");
        Ok(())
    }

    async fn save_oauth_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO oauth_states (user_id, state, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET state = excluded.state, created_at = excluded.created_at",
                params![user_id, state, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("save_oauth_state", e))?;
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        user_id: &str,
    ) -> Result<Option<(String, DateTime<Utc>)>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "DELETE FROM oauth_states WHERE user_id = ?1 RETURNING state, created_at",
                params![user_id],
            )
            .await
            .map_err(|e| query_err("take_oauth_state", e))?;
        first_row(rows, "take_oauth_state", |row| {
            let created: String = row.get(1)?;
            Ok((row.get(0)?, parse_datetime(&created)))
        })
        .await
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(
        &self,
        campaign: &Campaign,
        recipients: &[Recipient],
    ) -> Result<(), DatabaseError> {
        let _guard = self.tx_lock.lock().await;
        let conn = self.tx_conn().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| query_err("insert_campaign begin", e))?;

        if let Err(e) = insert_campaign_rows(&tx, campaign, recipients).await {
            if let Err(rb) = tx.rollback().await {
                warn!(campaign_id = %campaign.id, error = %rb, "Rollback failed");
            }
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| query_err("insert_campaign commit", e))?;

        info!(
            campaign_id = %campaign.id,
            recipients = recipients.len(),
            "Campaign created"
        );
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_err("get_campaign", e))?;
        first_row(rows, "get_campaign", row_to_campaign).await
    }

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE user_id = ?1 ORDER BY created_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| query_err("list_campaigns", e))?;
        collect_rows(rows, "list_campaigns", row_to_campaign).await
    }

    async fn list_campaigns_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = ?1"),
                params![status.to_string()],
            )
            .await
            .map_err(|e| query_err("list_campaigns_by_status", e))?;
        collect_rows(rows, "list_campaigns_by_status", row_to_campaign).await
    }

    async fn claim_campaign(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE campaigns SET status = 'sending', updated_at = ?1 WHERE id = ?2 AND status != 'sending'",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| query_err("claim_campaign", e))?;
        Ok(n > 0)
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE campaigns SET status = ?1, completed_at = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    status.to_string(),
                    opt_text(completed_at.map(|t| t.to_rfc3339()).as_deref()),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| query_err("update_campaign_status", e))?;
        debug!(campaign_id = %id, %status, "Campaign status updated");
        Ok(())
    }

    async fn refresh_campaign_counters(&self, id: Uuid) -> Result<CampaignCounters, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE campaigns SET
                total = (SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = ?1),
                sent = (SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = ?1 AND status = 'sent'),
                failed = (SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = ?1 AND status = 'failed'),
                updated_at = ?2
             WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| query_err("refresh_campaign_counters", e))?;

        let rows = conn
            .query(
                "SELECT total, sent, failed FROM campaigns WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_err("refresh_campaign_counters", e))?;
        first_row(rows, "refresh_campaign_counters", row_to_counters)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "campaign".into(),
                id: id.to_string(),
            })
    }

    // ── Recipients ──────────────────────────────────────────────────

    async fn get_recipient(&self, id: Uuid) -> Result<Option<Recipient>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_err("get_recipient", e))?;
        first_row(rows, "get_recipient", row_to_recipient).await
    }

    async fn list_recipients(
        &self,
        campaign_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<Recipient>, DatabaseError> {
        let rows = match status {
            Some(status) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients WHERE campaign_id = ?1 AND status = ?2 ORDER BY created_at ASC, rowid ASC"
                        ),
                        params![campaign_id.to_string(), status.to_string()],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients WHERE campaign_id = ?1 ORDER BY created_at ASC, rowid ASC"
                        ),
                        params![campaign_id.to_string()],
                    )
                    .await
            }
        }
        .map_err(|e| query_err("list_recipients", e))?;
        collect_rows(rows, "list_recipients", row_to_recipient).await
    }

    async fn mark_recipient_processing(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE campaign_recipients SET status = 'processing', error = NULL, updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| query_err("mark_recipient_processing", e))?;
        Ok(n > 0)
    }

    async fn mark_recipient_sent(
        &self,
        id: Uuid,
        email: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE campaign_recipients SET status = 'sent', email = ?1, sent_at = ?2, error = NULL, updated_at = ?3 WHERE id = ?4 AND status = 'processing'",
                params![
                    email,
                    sent_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| query_err("mark_recipient_sent", e))?;
        Ok(n > 0)
    }

    async fn mark_recipient_failed(&self, id: Uuid, error: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE campaign_recipients SET status = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'processing'",
                params![error, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| query_err("mark_recipient_failed", e))?;
        Ok(n > 0)
    }

    async fn record_call(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        notes: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let sent_at = (status == DeliveryStatus::Sent).then(|| now.clone());
        let n = self
            .conn()
            .execute(
                "UPDATE campaign_recipients SET status = ?1, notes = COALESCE(?2, notes), sent_at = ?3, updated_at = ?4 WHERE id = ?5 AND status IN ('pending', 'processing')",
                params![
                    status.to_string(),
                    opt_text(notes),
                    opt_text(sent_at.as_deref()),
                    now,
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| query_err("record_call", e))?;
        Ok(n > 0)
    }

    async fn reset_failed_recipients(&self, campaign_id: Uuid) -> Result<u64, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE campaign_recipients SET status = 'pending', error = NULL, updated_at = ?1 WHERE campaign_id = ?2 AND status = 'failed'",
                params![Utc::now().to_rfc3339(), campaign_id.to_string()],
            )
            .await
            .map_err(|e| query_err("reset_failed_recipients", e))?;
        if n > 0 {
            info!(campaign_id = %campaign_id, count = n, "Failed recipients re-queued");
        }
        Ok(n)
    }

    async fn fail_processing_recipients(
        &self,
        campaign_id: Uuid,
        reason: &str,
    ) -> Result<u64, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE campaign_recipients SET status = 'failed', error = ?1, updated_at = ?2 WHERE campaign_id = ?3 AND status = 'processing'",
                params![reason, Utc::now().to_rfc3339(), campaign_id.to_string()],
            )
            .await
            .map_err(|e| query_err("fail_processing_recipients", e))?;
        Ok(n)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
