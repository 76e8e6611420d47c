//! Schema migrations for onboarding storage, tracked in `_migrations`.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only; versions must increase.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "onboarding_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_progress (
                user_id TEXT NOT NULL,
                flow_id TEXT NOT NULL,
                current_step INTEGER NOT NULL DEFAULT 0,
                values_json TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'in_progress',
                version INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, flow_id)
            );

            CREATE TABLE IF NOT EXISTS agent_configurations (
                id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                flow_id TEXT NOT NULL,
                vertical TEXT NOT NULL,
                values_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, flow_id)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "configuration_vertical_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_agent_configurations_vertical
                ON agent_configurations(vertical);
            CREATE INDEX IF NOT EXISTS idx_onboarding_progress_status
                ON onboarding_progress(status);
        "#,
    },
];

/// Bring the schema up to the latest version.
///
/// Each pending migration and its `_migrations` row commit together, so a
/// failed step leaves the schema at the previous version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| migration_error("create _migrations", e))?;

    let applied = current_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        apply(conn, migration).await?;
    }

    let version = current_version(conn).await?;
    tracing::info!(version, "Schema migrated");
    Ok(())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let context = format!("V{} ({})", migration.version, migration.name);
    let tx = conn
        .transaction()
        .await
        .map_err(|e| migration_error(&context, e))?;
    tx.execute_batch(migration.sql)
        .await
        .map_err(|e| migration_error(&context, e))?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![migration.version, migration.name],
    )
    .await
    .map_err(|e| migration_error(&context, e))?;
    tx.commit().await.map_err(|e| migration_error(&context, e))
}

/// Highest applied version; 0 on a fresh database.
async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| migration_error("read version", e))?;
    match rows.next().await.map_err(|e| migration_error("read version", e))? {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| migration_error("read version", e)),
        None => Ok(0),
    }
}

fn migration_error(context: &str, err: libsql::Error) -> DatabaseError {
    DatabaseError::Migration(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn fresh_database_gets_both_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["onboarding_progress", "agent_configurations", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn each_version_is_recorded_by_name() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        assert_eq!(row1.get::<i64>(0).unwrap(), 1);
        assert_eq!(row1.get::<String>(1).unwrap(), "onboarding_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        assert_eq!(row2.get::<i64>(0).unwrap(), 2);
        assert_eq!(row2.get::<String>(1).unwrap(), "configuration_vertical_index");
    }

    #[tokio::test]
    async fn configuration_key_is_unique() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let insert = "INSERT INTO agent_configurations (id, user_id, flow_id, vertical, values_json, created_at)
                      VALUES (?1, 'u1', 'f1', 'general', '{}', '2026-01-01T00:00:00Z')";
        conn.execute(insert, libsql::params!["a"]).await.unwrap();
        assert!(conn.execute(insert, libsql::params!["b"]).await.is_err());
    }
}
