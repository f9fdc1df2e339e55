//! Unified `Database` trait, the single async interface for all persistence.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::DatabaseError;
use crate::model::{NewShipment, NpsStatus, Region, ScoreRequest, Shipment, User, Watermark};

/// Backend-agnostic database trait covering regions, watermarks, shipments,
/// users and score requests.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Regions ─────────────────────────────────────────────────────

    /// All regions, ordered by id.
    async fn list_regions(&self) -> Result<Vec<Region>, DatabaseError>;

    /// Insert a region by name, or return the existing row with that name.
    async fn upsert_region(&self, name: &str) -> Result<Region, DatabaseError>;

    // ── Watermarks ──────────────────────────────────────────────────

    async fn get_watermark(&self, region_id: i64) -> Result<Option<Watermark>, DatabaseError>;

    /// Create the watermark row for a region if it does not exist yet.
    /// An existing row is returned unchanged.
    async fn ensure_watermark(
        &self,
        region_id: i64,
        initial_no: i64,
    ) -> Result<Watermark, DatabaseError>;

    /// Store `max(current, last_import_no)` and return the stored value.
    /// Never lowers an existing watermark.
    async fn advance_watermark(
        &self,
        region_id: i64,
        last_import_no: i64,
    ) -> Result<Watermark, DatabaseError>;

    // ── Shipments ───────────────────────────────────────────────────

    /// Highest stored shipment number for a region, if any.
    async fn max_shipment_number(&self, region_id: i64) -> Result<Option<i64>, DatabaseError>;

    /// Insert a new `pending` shipment. Fails with `Constraint` if the
    /// `(region, number)` pair already exists.
    async fn insert_shipment(&self, shipment: &NewShipment) -> Result<Shipment, DatabaseError>;

    async fn get_shipment(&self, id: i64) -> Result<Option<Shipment>, DatabaseError>;

    /// All shipments with the given status, ordered by id.
    async fn list_shipments_by_status(
        &self,
        status: NpsStatus,
    ) -> Result<Vec<Shipment>, DatabaseError>;

    async fn update_shipment_status(&self, id: i64, status: NpsStatus)
    -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Insert a user by email, or return the existing row with that email.
    async fn upsert_user(&self, email: &str, region_id: Option<i64>)
    -> Result<User, DatabaseError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    /// Set the opt-out flag. Returns false if no user has that email.
    async fn set_user_surveyable(&self, email: &str, surveyable: bool)
    -> Result<bool, DatabaseError>;

    async fn mark_user_surveyed(&self, user_id: i64, on: NaiveDate) -> Result<(), DatabaseError>;

    // ── Score requests ──────────────────────────────────────────────

    /// Create a score request with a fresh uuid.
    async fn insert_score_request(
        &self,
        user_id: i64,
        shipment_id: i64,
    ) -> Result<ScoreRequest, DatabaseError>;

    async fn list_score_requests_for_shipment(
        &self,
        shipment_id: i64,
    ) -> Result<Vec<ScoreRequest>, DatabaseError>;
}
