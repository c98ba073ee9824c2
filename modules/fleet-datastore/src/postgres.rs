//! Postgres-backed datastore.
//!
//! Every multi-statement write runs inside its own nested transaction on the
//! connection it is given: a real `BEGIN` on a pooled connection when the
//! caller passed no transaction, a savepoint inside the caller's transaction
//! otherwise. A failed write therefore never leaves partial rows, and the
//! caller's transaction stays usable after it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::DatastoreConfig;
use crate::datastore::Datastore;
use crate::error::{DatastoreError, EntityKind, Result};
use crate::transaction::Transaction;
use crate::types::{
    FimSection, FimSections, NewFimSection, NewYaraSignatureGroup, YaraSignatureGroup,
};
use crate::yara::YaraSection;

#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool sized by `config`.
    pub async fn connect(config: &DatastoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(DatastoreError::Connection)?;

        info!(
            max_connections = config.max_connections,
            "Connected to datastore"
        );
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Datastore migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(DatastoreError::Connection)
    }

    /// Read-only transaction in which every statement sees the same snapshot.
    /// Failing to open it is a read failure.
    async fn begin_snapshot(&self) -> Result<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(DatastoreError::query)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(DatastoreError::query)?;
        Ok(tx)
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin(&self) -> Result<Transaction> {
        let tx = self.pool.begin().await.map_err(DatastoreError::begin)?;
        debug!("Transaction started");
        Ok(Transaction::new(tx))
    }

    async fn new_fim_section(
        &self,
        section: NewFimSection,
        tx: Option<&mut Transaction>,
    ) -> Result<FimSection> {
        section.validate()?;
        match tx {
            Some(tx) => {
                let created = insert_fim_section(tx.conn(), &section).await?;
                tx.record_write();
                Ok(created)
            }
            None => {
                let mut conn = self.acquire().await?;
                insert_fim_section(&mut conn, &section).await
            }
        }
    }

    async fn new_yara_signature_group(
        &self,
        group: NewYaraSignatureGroup,
        tx: Option<&mut Transaction>,
    ) -> Result<YaraSignatureGroup> {
        group.validate()?;
        match tx {
            Some(tx) => {
                let created = insert_signature_group(tx.conn(), &group).await?;
                tx.record_write();
                Ok(created)
            }
            None => {
                let mut conn = self.acquire().await?;
                insert_signature_group(&mut conn, &group).await
            }
        }
    }

    async fn new_yara_file_path(
        &self,
        section_name: &str,
        signature_group_name: &str,
        tx: Option<&mut Transaction>,
    ) -> Result<()> {
        match tx {
            Some(tx) => {
                insert_file_path(tx.conn(), section_name, signature_group_name).await?;
                tx.record_write();
                Ok(())
            }
            None => {
                let mut conn = self.acquire().await?;
                insert_file_path(&mut conn, section_name, signature_group_name).await
            }
        }
    }

    async fn yara_section(&self) -> Result<YaraSection> {
        let mut tx = self.begin_snapshot().await?;
        let section = load_yara_section(&mut tx).await?;
        tx.commit().await.map_err(DatastoreError::query)?;

        debug!(
            file_paths = section.file_paths.len(),
            signatures = section.signatures.len(),
            "Built YARA section"
        );
        Ok(section)
    }

    async fn fim_sections(&self) -> Result<FimSections> {
        let mut conn = self.pool.acquire().await.map_err(DatastoreError::query)?;
        load_fim_sections(&mut conn).await
    }

    async fn fim_snapshot(&self) -> Result<(FimSections, YaraSection)> {
        let mut tx = self.begin_snapshot().await?;
        let sections = load_fim_sections(&mut tx).await?;
        let yara = load_yara_section(&mut tx).await?;
        tx.commit().await.map_err(DatastoreError::query)?;
        Ok((sections, yara))
    }

    async fn clear_fim_sections(&self, tx: Option<&mut Transaction>) -> Result<()> {
        match tx {
            Some(tx) => {
                delete_fim_sections(tx.conn()).await?;
                tx.record_write();
                Ok(())
            }
            None => {
                let mut conn = self.acquire().await?;
                delete_fim_sections(&mut conn).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Read statements
// ---------------------------------------------------------------------------

async fn load_yara_section(conn: &mut PgConnection) -> Result<YaraSection> {
    let associations = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT s.section_name, g.signature_name
        FROM yara_file_paths fp
        JOIN fim_sections s ON s.id = fp.fim_section_id
        JOIN yara_signature_groups g ON g.id = fp.yara_signature_group_id
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(DatastoreError::query)?;

    let groups = sqlx::query_as::<_, (String, Vec<String>)>(
        r#"
        SELECT g.signature_name,
               COALESCE(
                   array_agg(p.path ORDER BY p.position) FILTER (WHERE p.path IS NOT NULL),
                   '{}'::text[]
               ) AS paths
        FROM yara_signature_groups g
        LEFT JOIN yara_signature_paths p ON p.yara_signature_group_id = g.id
        GROUP BY g.id, g.signature_name
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(DatastoreError::query)?;

    Ok(YaraSection::build(associations, groups))
}

async fn load_fim_sections(conn: &mut PgConnection) -> Result<FimSections> {
    let rows = sqlx::query_as::<_, (String, Vec<String>)>(
        r#"
        SELECT s.section_name,
               COALESCE(
                   array_agg(p.path ORDER BY p.position) FILTER (WHERE p.path IS NOT NULL),
                   '{}'::text[]
               ) AS paths
        FROM fim_sections s
        LEFT JOIN fim_section_paths p ON p.fim_section_id = s.id
        GROUP BY s.id, s.section_name
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(DatastoreError::query)?;

    Ok(rows.into_iter().collect())
}

// ---------------------------------------------------------------------------
// Write statements
// ---------------------------------------------------------------------------

#[instrument(skip(conn, section), fields(section_name = %section.section_name))]
async fn insert_fim_section(
    conn: &mut PgConnection,
    section: &NewFimSection,
) -> Result<FimSection> {
    let mut tx = conn.begin().await.map_err(DatastoreError::begin)?;

    let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO fim_sections (section_name, description)
        VALUES ($1, $2)
        RETURNING id, created_at
        "#,
    )
    .bind(&section.section_name)
    .bind(&section.description)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| DatastoreError::insert(e, EntityKind::FimSection, &section.section_name))?;

    sqlx::query(
        r#"
        INSERT INTO fim_section_paths (fim_section_id, position, path)
        SELECT $1, (t.ord - 1)::int, t.path
        FROM UNNEST($2::text[]) WITH ORDINALITY AS t(path, ord)
        "#,
    )
    .bind(id)
    .bind(&section.paths)
    .execute(&mut *tx)
    .await
    .map_err(DatastoreError::write)?;

    tx.commit().await.map_err(DatastoreError::Transaction)?;

    info!(id, paths = section.paths.len(), "Created FIM section");
    Ok(FimSection {
        id,
        section_name: section.section_name.clone(),
        description: section.description.clone(),
        paths: section.paths.clone(),
        created_at,
    })
}

#[instrument(skip(conn, group), fields(signature_name = %group.signature_name))]
async fn insert_signature_group(
    conn: &mut PgConnection,
    group: &NewYaraSignatureGroup,
) -> Result<YaraSignatureGroup> {
    let mut tx = conn.begin().await.map_err(DatastoreError::begin)?;

    let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO yara_signature_groups (signature_name)
        VALUES ($1)
        RETURNING id, created_at
        "#,
    )
    .bind(&group.signature_name)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| DatastoreError::insert(e, EntityKind::YaraSignatureGroup, &group.signature_name))?;

    sqlx::query(
        r#"
        INSERT INTO yara_signature_paths (yara_signature_group_id, position, path)
        SELECT $1, (t.ord - 1)::int, t.path
        FROM UNNEST($2::text[]) WITH ORDINALITY AS t(path, ord)
        "#,
    )
    .bind(id)
    .bind(&group.paths)
    .execute(&mut *tx)
    .await
    .map_err(DatastoreError::write)?;

    tx.commit().await.map_err(DatastoreError::Transaction)?;

    info!(id, paths = group.paths.len(), "Created YARA signature group");
    Ok(YaraSignatureGroup {
        id,
        signature_name: group.signature_name.clone(),
        paths: group.paths.clone(),
        created_at,
    })
}

#[instrument(skip(conn))]
async fn insert_file_path(
    conn: &mut PgConnection,
    section_name: &str,
    signature_group_name: &str,
) -> Result<()> {
    let mut tx = conn.begin().await.map_err(DatastoreError::begin)?;

    // FOR SHARE keeps both rows from being deleted before the insert lands.
    let section_id: i64 =
        sqlx::query_scalar("SELECT id FROM fim_sections WHERE section_name = $1 FOR SHARE")
            .bind(section_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatastoreError::query)?
            .ok_or_else(|| DatastoreError::NotFound {
                kind: EntityKind::FimSection,
                name: section_name.to_string(),
            })?;

    let group_id: i64 = sqlx::query_scalar(
        "SELECT id FROM yara_signature_groups WHERE signature_name = $1 FOR SHARE",
    )
    .bind(signature_group_name)
    .fetch_optional(&mut *tx)
    .await
    .map_err(DatastoreError::query)?
    .ok_or_else(|| DatastoreError::NotFound {
        kind: EntityKind::YaraSignatureGroup,
        name: signature_group_name.to_string(),
    })?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO yara_file_paths (fim_section_id, yara_signature_group_id)
        VALUES ($1, $2)
        ON CONFLICT (fim_section_id, yara_signature_group_id) DO NOTHING
        "#,
    )
    .bind(section_id)
    .bind(group_id)
    .execute(&mut *tx)
    .await
    .map_err(DatastoreError::write)?
    .rows_affected();

    tx.commit().await.map_err(DatastoreError::Transaction)?;

    if inserted == 0 {
        debug!("Association already present");
    } else {
        info!("Created YARA file path association");
    }
    Ok(())
}

async fn delete_fim_sections(conn: &mut PgConnection) -> Result<()> {
    // Paths and associations go with their sections via ON DELETE CASCADE.
    let deleted = sqlx::query("DELETE FROM fim_sections")
        .execute(conn)
        .await
        .map_err(DatastoreError::write)?
        .rows_affected();

    info!(deleted, "Cleared FIM sections");
    Ok(())
}
