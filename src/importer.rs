//! Shipment importer. Pulls new shipments per region and advances the
//! region watermark.
//!
//! Per region:
//! 1. resolve the region's endpoint (unknown names abort the run)
//! 2. read the watermark, initializing it from the stored shipments if absent
//! 3. request shipments numbered above the watermark inside the date window
//! 4. store each record with a placeholder user, stopping at the first failure
//! 5. advance the watermark to the highest number seen

use std::sync::Arc;

use chrono::NaiveDate;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{NewShipment, Region};
use crate::nav::{RemoteShipment, ShipmentSource, import_filters};
use crate::store::Database;

/// Domain of generated placeholder addresses. Reserved, never deliverable.
pub const PLACEHOLDER_EMAIL_DOMAIN: &str = "example.com";

const PLACEHOLDER_LOCAL_LEN: usize = 16;

/// Outcome of importing a single region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionImport {
    pub region: String,
    /// Watermark the remote request was filtered with.
    pub requested_above: i64,
    /// Records returned by the remote.
    pub received: usize,
    /// Records stored locally.
    pub imported: usize,
    /// Watermark after the run.
    pub watermark: i64,
    /// Why record processing stopped early, if it did.
    pub aborted: Option<String>,
}

/// Outcome of a full import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub regions: Vec<RegionImport>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.regions.iter().map(|r| r.imported).sum()
    }
}

/// Imports shipments from a `ShipmentSource` into the local store.
pub struct ShipmentImporter {
    store: Arc<dyn Database>,
    source: Arc<dyn ShipmentSource>,
}

impl ShipmentImporter {
    pub fn new(store: Arc<dyn Database>, source: Arc<dyn ShipmentSource>) -> Self {
        Self { store, source }
    }

    /// Import every region in id order.
    ///
    /// A record-level failure only stops that region. Any region-level
    /// failure (bad region name, watermark read, remote call) aborts the
    /// run and is returned.
    pub async fn import_all_regions(&self, today: NaiveDate) -> Result<ImportReport> {
        let regions = self.store.list_regions().await?;
        let mut report = ImportReport::default();

        for region in &regions {
            match self.import_region(region, today).await {
                Ok(outcome) => report.regions.push(outcome),
                Err(e) => {
                    error!(region = %region.name, error = %e, "Shipment import aborted");
                    return Err(e);
                }
            }
        }

        info!(
            regions = report.regions.len(),
            imported = report.imported(),
            "Shipment import complete"
        );
        Ok(report)
    }

    /// Import a single region.
    pub async fn import_region(&self, region: &Region, today: NaiveDate) -> Result<RegionImport> {
        let code = region.code()?;
        let watermark = self.last_import_no(region).await?;

        let filters = import_filters(watermark, today);
        let records = self.source.fetch_shipments(code, &filters).await?;

        let mut outcome = RegionImport {
            region: region.name.clone(),
            requested_above: watermark,
            received: records.len(),
            imported: 0,
            watermark,
            aborted: None,
        };

        if records.is_empty() {
            info!(region = %region.name, "No new shipments");
            return Ok(outcome);
        }

        let mut max_seen = watermark;
        for record in &records {
            match self.store_record(region, record).await {
                Ok(number) => {
                    outcome.imported += 1;
                    max_seen = max_seen.max(number);
                }
                Err(e) => {
                    warn!(
                        region = %region.name,
                        no = %record.no,
                        error = %e,
                        "Failed to store shipment, skipping rest of region"
                    );
                    outcome.aborted = Some(e.to_string());
                    break;
                }
            }
        }

        match self.store.advance_watermark(region.id, max_seen).await {
            Ok(stored) => outcome.watermark = stored.last_import_no,
            Err(e) => {
                error!(region = %region.name, max_seen, error = %e, "Failed to store watermark");
            }
        }

        info!(
            region = %region.name,
            received = outcome.received,
            imported = outcome.imported,
            watermark = outcome.watermark,
            "Shipments imported"
        );
        Ok(outcome)
    }

    /// Current watermark, initialized from the highest stored shipment number
    /// of the region (or 0) the first time a region is seen.
    async fn last_import_no(&self, region: &Region) -> Result<i64> {
        if let Some(watermark) = self.store.get_watermark(region.id).await? {
            return Ok(watermark.last_import_no);
        }

        let initial = self
            .store
            .max_shipment_number(region.id)
            .await?
            .unwrap_or(0);
        let watermark = self.store.ensure_watermark(region.id, initial).await?;
        info!(
            region = %region.name,
            last_import_no = watermark.last_import_no,
            "Watermark initialized"
        );
        Ok(watermark.last_import_no)
    }

    async fn store_record(&self, region: &Region, record: &RemoteShipment) -> Result<i64> {
        let number = record.number()?;
        let shipment_date = record.date()?;

        let user = self
            .store
            .upsert_user(&placeholder_email(), Some(region.id))
            .await?;

        let shipment = self
            .store
            .insert_shipment(&NewShipment {
                number,
                shipment_date,
                user_id: user.id,
                region_id: region.id,
            })
            .await?;

        debug!(shipment_id = shipment.id, number, user = %user.email, "Stored shipment");
        Ok(number)
    }
}

/// Random address standing in for the customer until real contact data is
/// imported.
pub fn placeholder_email() -> String {
    let local: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PLACEHOLDER_LOCAL_LEN)
        .map(char::from)
        .collect();
    format!("{}@{PLACEHOLDER_EMAIL_DOMAIN}", local.to_lowercase())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ConfigError, Error, RemoteError};
    use crate::model::{NpsStatus, RegionCode};
    use crate::nav::ShipmentFilter;
    use crate::store::LibSqlBackend;

    /// Canned responses per region; records every request it receives.
    #[derive(Default)]
    struct StubSource {
        responses: HashMap<RegionCode, Vec<RemoteShipment>>,
        failing: Option<RegionCode>,
        requests: Mutex<Vec<(RegionCode, Vec<String>)>>,
    }

    impl StubSource {
        fn with(mut self, region: RegionCode, numbers: &[&str]) -> Self {
            let records = numbers
                .iter()
                .map(|no| RemoteShipment {
                    no: no.to_string(),
                    shipment_date: "2023-02-01".to_string(),
                })
                .collect();
            self.responses.insert(region, records);
            self
        }

        fn failing_for(mut self, region: RegionCode) -> Self {
            self.failing = Some(region);
            self
        }

        fn requests(&self) -> Vec<(RegionCode, Vec<String>)> {
            self.requests.lock().unwrap().clone()
        }

        fn criteria_for(&self, region: RegionCode) -> Vec<String> {
            self.requests()
                .into_iter()
                .find(|(r, _)| *r == region)
                .map(|(_, c)| c)
                .expect("region was requested")
        }
    }

    #[async_trait]
    impl ShipmentSource for StubSource {
        async fn fetch_shipments(
            &self,
            region: RegionCode,
            filters: &[ShipmentFilter],
        ) -> std::result::Result<Vec<RemoteShipment>, RemoteError> {
            self.requests.lock().unwrap().push((
                region,
                filters.iter().map(|f| f.criteria.clone()).collect(),
            ));
            if self.failing == Some(region) {
                return Err(RemoteError::Fault("service unavailable".into()));
            }
            Ok(self.responses.get(&region).cloned().unwrap_or_default())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, 15).unwrap()
    }

    async fn setup(source: StubSource) -> (Arc<LibSqlBackend>, Arc<StubSource>, ShipmentImporter) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let source = Arc::new(source);
        let importer = ShipmentImporter::new(db.clone(), source.clone());
        (db, source, importer)
    }

    async fn region_id(db: &LibSqlBackend, name: &str) -> i64 {
        db.upsert_region(name).await.unwrap().id
    }

    async fn seed_shipment(db: &LibSqlBackend, region_id: i64, number: i64) {
        let user = db.upsert_user(&placeholder_email(), Some(region_id)).await.unwrap();
        db.insert_shipment(&NewShipment {
            number,
            shipment_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            user_id: user.id,
            region_id,
        })
        .await
        .unwrap();
    }

    async fn watermark(db: &LibSqlBackend, region_id: i64) -> i64 {
        db.get_watermark(region_id).await.unwrap().unwrap().last_import_no
    }

    #[tokio::test]
    async fn watermark_initialized_from_region_max() {
        let (db, source, importer) = setup(StubSource::default()).await;
        let eu = region_id(&db, "eu").await;
        let us = region_id(&db, "us").await;
        seed_shipment(&db, eu, 5).await;
        seed_shipment(&db, eu, 12).await;
        seed_shipment(&db, us, 900).await;

        importer.import_all_regions(today()).await.unwrap();

        assert_eq!(watermark(&db, eu).await, 12);
        assert_eq!(watermark(&db, us).await, 900);
        assert_eq!(source.criteria_for(RegionCode::Eu)[0], ">12");
        assert_eq!(source.criteria_for(RegionCode::Us)[0], ">900");
    }

    #[tokio::test]
    async fn watermark_starts_at_zero_without_shipments() {
        let (db, source, importer) = setup(StubSource::default()).await;
        let eu = region_id(&db, "eu").await;

        importer.import_all_regions(today()).await.unwrap();

        assert_eq!(watermark(&db, eu).await, 0);
        assert_eq!(
            source.criteria_for(RegionCode::Eu),
            vec![">0".to_string(), "06152022..05162023".to_string()]
        );
    }

    #[tokio::test]
    async fn out_of_order_records_advance_to_max() {
        let source = StubSource::default().with(RegionCode::Eu, &["105", "103", "110", "104"]);
        let (db, _source, importer) = setup(source).await;
        let eu = region_id(&db, "eu").await;
        db.advance_watermark(eu, 100).await.unwrap();

        let report = importer.import_all_regions(today()).await.unwrap();

        let eu_report = &report.regions[0];
        assert_eq!(eu_report.region, "eu");
        assert_eq!(eu_report.requested_above, 100);
        assert_eq!(eu_report.received, 4);
        assert_eq!(eu_report.imported, 4);
        assert_eq!(eu_report.watermark, 110);
        assert_eq!(watermark(&db, eu).await, 110);

        let pending = db.list_shipments_by_status(NpsStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 4);
    }

    #[tokio::test]
    async fn watermark_never_decreases() {
        // A misbehaving remote returning numbers below the filter
        let source = StubSource::default().with(RegionCode::Us, &["200"]);
        let (db, _source, importer) = setup(source).await;
        let us = region_id(&db, "us").await;
        db.advance_watermark(us, 500).await.unwrap();

        let report = importer.import_all_regions(today()).await.unwrap();

        assert_eq!(watermark(&db, us).await, 500);
        assert_eq!(report.regions[1].watermark, 500);
    }

    #[tokio::test]
    async fn record_failure_stops_region_but_not_run() {
        let source = StubSource::default()
            .with(RegionCode::Eu, &["6", "7", "8"])
            .with(RegionCode::Us, &["31"]);
        let (db, _source, importer) = setup(source).await;
        let eu = region_id(&db, "eu").await;
        let us = region_id(&db, "us").await;
        db.advance_watermark(eu, 5).await.unwrap();
        // 7 already exists locally, so storing it violates the unique constraint
        seed_shipment(&db, eu, 7).await;

        let report = importer.import_all_regions(today()).await.unwrap();

        let eu_report = &report.regions[0];
        assert_eq!(eu_report.imported, 1);
        assert!(eu_report.aborted.is_some());
        assert_eq!(watermark(&db, eu).await, 6);
        assert_eq!(db.max_shipment_number(eu).await.unwrap(), Some(7));

        assert_eq!(report.regions[1].imported, 1);
        assert_eq!(watermark(&db, us).await, 31);
    }

    #[tokio::test]
    async fn malformed_number_stops_region() {
        let source = StubSource::default().with(RegionCode::Eu, &["11", "WS-12", "13"]);
        let (db, _source, importer) = setup(source).await;
        let eu = region_id(&db, "eu").await;

        let report = importer.import_all_regions(today()).await.unwrap();

        assert_eq!(report.regions[0].imported, 1);
        assert_eq!(watermark(&db, eu).await, 11);
    }

    #[tokio::test]
    async fn unknown_region_aborts_run() {
        let source = StubSource::default().with(RegionCode::Eu, &["1"]);
        let (db, source, importer) = setup(source).await;
        region_id(&db, "uk").await;

        let err = importer.import_all_regions(today()).await.unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::UnknownRegion(ref n)) if n == "uk"));
        // eu and us ran before the bad region; uk was never requested
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn remote_failure_aborts_run() {
        let source = StubSource::default()
            .failing_for(RegionCode::Eu)
            .with(RegionCode::Us, &["1"]);
        let (db, source, importer) = setup(source).await;
        let us = region_id(&db, "us").await;

        let err = importer.import_all_regions(today()).await.unwrap_err();

        assert!(matches!(err, Error::Remote(RemoteError::Fault(_))));
        assert_eq!(source.requests().len(), 1);
        assert!(db.get_watermark(us).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn each_shipment_gets_its_own_placeholder_user() {
        let source = StubSource::default().with(RegionCode::Us, &["1", "2"]);
        let (db, _source, importer) = setup(source).await;

        importer.import_all_regions(today()).await.unwrap();

        let shipments = db.list_shipments_by_status(NpsStatus::Pending).await.unwrap();
        assert_eq!(shipments.len(), 2);
        assert_ne!(shipments[0].user_id, shipments[1].user_id);

        let user = db.get_user(shipments[0].user_id).await.unwrap().unwrap();
        assert!(user.email.ends_with("@example.com"));
        assert_eq!(user.region_name.as_deref(), Some("us"));
        assert!(user.surveyable);
    }

    #[test]
    fn placeholder_emails_differ() {
        let a = placeholder_email();
        let b = placeholder_email();
        assert_ne!(a, b);
        assert_eq!(a.len(), PLACEHOLDER_LOCAL_LEN + 1 + PLACEHOLDER_EMAIL_DOMAIN.len());
    }
}
