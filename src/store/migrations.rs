//! Schema migrations. Applied versions are recorded in `_migrations`; only
//! steps above the highest recorded version run, each in its own transaction.

use libsql::Connection;

use crate::error::DatabaseError;

struct Step {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append-only. Never edit a step that has shipped.
static STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "leads_and_lists",
        sql: r#"
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                place_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                formatted_address TEXT NOT NULL DEFAULT '',
                website TEXT,
                phone TEXT,
                rating REAL,
                total_ratings INTEGER,
                flags TEXT NOT NULL DEFAULT '[]',
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_updated ON leads(updated_at);

            CREATE TABLE IF NOT EXISTS lead_lists (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_lead_lists_user ON lead_lists(user_id);

            CREATE TABLE IF NOT EXISTS list_items (
                id TEXT PRIMARY KEY,
                list_id TEXT NOT NULL REFERENCES lead_lists(id) ON DELETE CASCADE,
                lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
                notes TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (list_id, lead_id)
            );
            CREATE INDEX IF NOT EXISTS idx_list_items_list ON list_items(list_id);

            CREATE TABLE IF NOT EXISTS lead_tags (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (lead_id, tag)
            );
            CREATE INDEX IF NOT EXISTS idx_lead_tags_lead ON lead_tags(lead_id);
        "#,
    },
    Step {
        version: 2,
        name: "outreach",
        sql: r#"
            CREATE TABLE IF NOT EXISTS email_templates (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_templates_user ON email_templates(user_id);

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                list_id TEXT NOT NULL,
                name TEXT NOT NULL,
                campaign_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                subject TEXT,
                body TEXT,
                call_script TEXT,
                call_notes TEXT,
                total INTEGER NOT NULL DEFAULT 0,
                sent INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_user ON campaigns(user_id);

            CREATE TABLE IF NOT EXISTS campaign_recipients (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                lead_id TEXT NOT NULL,
                place_id TEXT NOT NULL,
                company_name TEXT NOT NULL,
                address TEXT NOT NULL DEFAULT '',
                phone TEXT,
                website TEXT,
                email TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                notes TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_recipients_campaign ON campaign_recipients(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_recipients_status ON campaign_recipients(campaign_id, status);
        "#,
    },
    Step {
        version: 3,
        name: "user_settings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id TEXT PRIMARY KEY,
                gmail_access_token TEXT,
                gmail_refresh_token TEXT,
                gmail_token_expiry INTEGER,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
    Step {
        version: 4,
        name: "oauth_states",
        sql: r#"
            CREATE TABLE IF NOT EXISTS oauth_states (
                user_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
    },
];

fn migration_err(what: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Migration(format!("{what}: {e}"))
}

/// Bring the schema up to the latest step.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(|e| migration_err("create _migrations", e))?;

    let applied = applied_version(conn).await?;
    let pending = STEPS.iter().filter(|step| step.version > applied);

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Migrating schema");
        let tx = conn
            .transaction()
            .await
            .map_err(|e| migration_err("begin", e))?;
        tx.execute_batch(step.sql)
            .await
            .map_err(|e| migration_err(&format!("step {} ({})", step.version, step.name), e))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![step.version, step.name],
        )
        .await
        .map_err(|e| migration_err(&format!("record step {}", step.version), e))?;
        tx.commit().await.map_err(|e| migration_err("commit", e))?;
    }
    Ok(())
}

async fn applied_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| migration_err("read version", e))?;
    match rows.next().await.map_err(|e| migration_err("read version", e))? {
        Some(row) => row.get::<i64>(0).map_err(|e| migration_err("read version", e)),
        None => Ok(0),
    }
}
