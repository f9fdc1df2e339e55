//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{NewShipment, NpsStatus, Region, ScoreRequest, Shipment, User, Watermark};
use crate::store::migrations;
use crate::store::traits::Database;

/// Date format for `shipment_date` and `last_nps_email_sent_at` columns.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a libsql error, keeping unique-constraint failures distinguishable.
fn query_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(column: &str, s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| DatabaseError::Query(format!("bad {column} '{s}': {e}")))
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn int_col(row: &libsql::Row, idx: i32, op: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{op} column {idx}: {e}")))
}

fn text_col(row: &libsql::Row, idx: i32, op: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{op} column {idx}: {e}")))
}

/// Nullable integer column. Only SQL NULL maps to `None`.
fn opt_int_col(row: &libsql::Row, idx: i32, op: &str) -> Result<Option<i64>, DatabaseError> {
    match row
        .get_value(idx)
        .map_err(|e| DatabaseError::Query(format!("{op} column {idx}: {e}")))?
    {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(v) => Ok(Some(v)),
        other => Err(DatabaseError::Query(format!(
            "{op} column {idx}: expected integer, got {other:?}"
        ))),
    }
}

/// Nullable text column. Only SQL NULL maps to `None`.
fn opt_text_col(row: &libsql::Row, idx: i32, op: &str) -> Result<Option<String>, DatabaseError> {
    match row
        .get_value(idx)
        .map_err(|e| DatabaseError::Query(format!("{op} column {idx}: {e}")))?
    {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(DatabaseError::Query(format!(
            "{op} column {idx}: expected text, got {other:?}"
        ))),
    }
}

const SHIPMENT_COLUMNS: &str =
    "id, number, shipment_date, user_id, region_id, nps_status, created_at";

const USER_COLUMNS: &str = "u.id, u.email, u.region_id, r.name, u.surveyable, \
     u.last_nps_email_sent_at, u.created_at";

/// Map a libsql Row to a Shipment. Column order matches SHIPMENT_COLUMNS.
fn row_to_shipment(row: &libsql::Row) -> Result<Shipment, DatabaseError> {
    let date_str = text_col(row, 2, "shipment")?;
    let status_str = text_col(row, 5, "shipment")?;
    let created_str = text_col(row, 6, "shipment")?;

    Ok(Shipment {
        id: int_col(row, 0, "shipment")?,
        number: int_col(row, 1, "shipment")?,
        shipment_date: parse_date("shipment_date", &date_str)?,
        user_id: int_col(row, 3, "shipment")?,
        region_id: int_col(row, 4, "shipment")?,
        nps_status: status_str.parse().map_err(DatabaseError::Query)?,
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a User. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let surveyable = int_col(row, 4, "user")?;
    let sent_at = opt_text_col(row, 5, "user")?;
    let created_str = text_col(row, 6, "user")?;

    Ok(User {
        id: int_col(row, 0, "user")?,
        email: text_col(row, 1, "user")?,
        region_id: opt_int_col(row, 2, "user")?,
        region_name: opt_text_col(row, 3, "user")?,
        surveyable: surveyable != 0,
        last_nps_email_sent_at: sent_at
            .map(|s| parse_date("last_nps_email_sent_at", &s))
            .transpose()?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_score_request(row: &libsql::Row) -> Result<ScoreRequest, DatabaseError> {
    let uuid_str = text_col(row, 0, "score_request")?;
    let created_str = text_col(row, 3, "score_request")?;
    Ok(ScoreRequest {
        uuid: Uuid::parse_str(&uuid_str)
            .map_err(|e| DatabaseError::Query(format!("bad score_request uuid: {e}")))?,
        user_id: int_col(row, 1, "score_request")?,
        shipment_id: int_col(row, 2, "score_request")?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Regions ─────────────────────────────────────────────────────

    async fn list_regions(&self) -> Result<Vec<Region>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, name FROM regions ORDER BY id", ())
            .await
            .map_err(|e| query_err("list_regions", e))?;

        let mut regions = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_err("list_regions", e))? {
            regions.push(Region {
                id: int_col(&row, 0, "region")?,
                name: text_col(&row, 1, "region")?,
            });
        }
        Ok(regions)
    }

    async fn upsert_region(&self, name: &str) -> Result<Region, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO regions (name) VALUES (?1)",
            params![name],
        )
        .await
        .map_err(|e| query_err("upsert_region", e))?;

        let mut rows = conn
            .query("SELECT id, name FROM regions WHERE name = ?1", params![name])
            .await
            .map_err(|e| query_err("upsert_region", e))?;
        match rows.next().await.map_err(|e| query_err("upsert_region", e))? {
            Some(row) => Ok(Region {
                id: int_col(&row, 0, "region")?,
                name: text_col(&row, 1, "region")?,
            }),
            None => Err(DatabaseError::NotFound {
                entity: "region".into(),
                id: name.to_string(),
            }),
        }
    }

    // ── Watermarks ──────────────────────────────────────────────────

    async fn get_watermark(&self, region_id: i64) -> Result<Option<Watermark>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT region_id, last_import_no FROM last_imported_shipment_no WHERE region_id = ?1",
                params![region_id],
            )
            .await
            .map_err(|e| query_err("get_watermark", e))?;

        match rows.next().await.map_err(|e| query_err("get_watermark", e))? {
            Some(row) => Ok(Some(Watermark {
                region_id: int_col(&row, 0, "watermark")?,
                last_import_no: int_col(&row, 1, "watermark")?,
            })),
            None => Ok(None),
        }
    }

    async fn ensure_watermark(
        &self,
        region_id: i64,
        initial_no: i64,
    ) -> Result<Watermark, DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO last_imported_shipment_no (region_id, last_import_no) VALUES (?1, ?2)",
                params![region_id, initial_no],
            )
            .await
            .map_err(|e| query_err("ensure_watermark", e))?;

        self.get_watermark(region_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "watermark".into(),
                id: region_id.to_string(),
            })
    }

    async fn advance_watermark(
        &self,
        region_id: i64,
        last_import_no: i64,
    ) -> Result<Watermark, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO last_imported_shipment_no (region_id, last_import_no) VALUES (?1, ?2)
                 ON CONFLICT(region_id) DO UPDATE SET
                    last_import_no = MAX(last_import_no, excluded.last_import_no),
                    updated_at = datetime('now')",
                params![region_id, last_import_no],
            )
            .await
            .map_err(|e| query_err("advance_watermark", e))?;

        let watermark = self
            .get_watermark(region_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "watermark".into(),
                id: region_id.to_string(),
            })?;
        debug!(region_id, last_import_no = watermark.last_import_no, "Watermark stored");
        Ok(watermark)
    }

    // ── Shipments ───────────────────────────────────────────────────

    async fn max_shipment_number(&self, region_id: i64) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT MAX(number) FROM shipments WHERE region_id = ?1",
                params![region_id],
            )
            .await
            .map_err(|e| query_err("max_shipment_number", e))?;

        match rows
            .next()
            .await
            .map_err(|e| query_err("max_shipment_number", e))?
        {
            Some(row) => opt_int_col(&row, 0, "max_shipment_number"),
            None => Ok(None),
        }
    }

    async fn insert_shipment(&self, shipment: &NewShipment) -> Result<Shipment, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO shipments (number, shipment_date, user_id, region_id, nps_status, created_at)
                     VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
                     RETURNING {SHIPMENT_COLUMNS}"
                ),
                params![
                    shipment.number,
                    shipment.shipment_date.format(DATE_FORMAT).to_string(),
                    shipment.user_id,
                    shipment.region_id,
                    now,
                ],
            )
            .await
            .map_err(|e| query_err("insert_shipment", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| query_err("insert_shipment", e))?
            .ok_or_else(|| DatabaseError::Query("insert_shipment: no row returned".into()))?;
        let stored = row_to_shipment(&row)?;

        debug!(
            shipment_id = stored.id,
            number = stored.number,
            region_id = stored.region_id,
            "Shipment inserted"
        );
        Ok(stored)
    }

    async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| query_err("get_shipment", e))?;

        match rows.next().await.map_err(|e| query_err("get_shipment", e))? {
            Some(row) => Ok(Some(row_to_shipment(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_shipments_by_status(
        &self,
        status: NpsStatus,
    ) -> Result<Vec<Shipment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE nps_status = ?1 ORDER BY id ASC"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| query_err("list_shipments_by_status", e))?;

        let mut shipments = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("list_shipments_by_status", e))?
        {
            shipments.push(row_to_shipment(&row)?);
        }
        Ok(shipments)
    }

    async fn update_shipment_status(
        &self,
        id: i64,
        status: NpsStatus,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE shipments SET nps_status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .await
            .map_err(|e| query_err("update_shipment_status", e))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "shipment".into(),
                id: id.to_string(),
            });
        }
        debug!(shipment_id = id, status = %status, "Shipment status updated");
        Ok(())
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn upsert_user(
        &self,
        email: &str,
        region_id: Option<i64>,
    ) -> Result<User, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO users (email, region_id, surveyable, created_at) VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(email) DO NOTHING",
                params![email, opt_int(region_id), now],
            )
            .await
            .map_err(|e| query_err("upsert_user", e))?;

        self.get_user_by_email(email)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".into(),
                id: email.to_string(),
            })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users u LEFT JOIN regions r ON r.id = u.region_id WHERE u.id = ?1"
                ),
                params![id],
            )
            .await
            .map_err(|e| query_err("get_user", e))?;

        match rows.next().await.map_err(|e| query_err("get_user", e))? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users u LEFT JOIN regions r ON r.id = u.region_id WHERE u.email = ?1"
                ),
                params![email],
            )
            .await
            .map_err(|e| query_err("get_user_by_email", e))?;

        match rows
            .next()
            .await
            .map_err(|e| query_err("get_user_by_email", e))?
        {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_user_surveyable(
        &self,
        email: &str,
        surveyable: bool,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE users SET surveyable = ?1 WHERE email = ?2",
                params![surveyable as i64, email],
            )
            .await
            .map_err(|e| query_err("set_user_surveyable", e))?;
        Ok(affected > 0)
    }

    async fn mark_user_surveyed(&self, user_id: i64, on: NaiveDate) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE users SET last_nps_email_sent_at = ?1 WHERE id = ?2",
                params![on.format(DATE_FORMAT).to_string(), user_id],
            )
            .await
            .map_err(|e| query_err("mark_user_surveyed", e))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Score requests ──────────────────────────────────────────────

    async fn insert_score_request(
        &self,
        user_id: i64,
        shipment_id: i64,
    ) -> Result<ScoreRequest, DatabaseError> {
        let request = ScoreRequest {
            uuid: Uuid::new_v4(),
            user_id,
            shipment_id,
            created_at: Utc::now(),
        };
        self.conn()
            .execute(
                "INSERT INTO score_requests (uuid, user_id, shipment_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    request.uuid.to_string(),
                    user_id,
                    shipment_id,
                    request.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("insert_score_request", e))?;

        debug!(uuid = %request.uuid, shipment_id, "Score request created");
        Ok(request)
    }

    async fn list_score_requests_for_shipment(
        &self,
        shipment_id: i64,
    ) -> Result<Vec<ScoreRequest>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT uuid, user_id, shipment_id, created_at FROM score_requests
                 WHERE shipment_id = ?1 ORDER BY created_at ASC",
                params![shipment_id],
            )
            .await
            .map_err(|e| query_err("list_score_requests_for_shipment", e))?;

        let mut requests = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("list_score_requests_for_shipment", e))?
        {
            requests.push(row_to_score_request(&row)?);
        }
        Ok(requests)
    }
}
