//! End-to-end: SOAP import from a mock NAV server, then survey dispatch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shipment_nps::config::NavConfig;
use shipment_nps::error::MailError;
use shipment_nps::importer::ShipmentImporter;
use shipment_nps::model::NpsStatus;
use shipment_nps::nav::NavClient;
use shipment_nps::scheduler;
use shipment_nps::store::{Database, LibSqlBackend};
use shipment_nps::survey::{Mailer, OutboundEmail, SurveyDispatcher};

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn shipments_response(records: &[(&str, &str)]) -> String {
    let body: String = records
        .iter()
        .map(|(no, date)| {
            format!("<WebSalesShipment><No>{no}</No><Shipment_Date>{date}</Shipment_Date></WebSalesShipment>")
        })
        .collect();
    format!(
        r#"<Soap:Envelope xmlns:Soap="http://schemas.xmlsoap.org/soap/envelope/"><Soap:Body><ReadMultiple_Result xmlns="urn:microsoft-dynamics-schemas/page/websalesshipment"><ReadMultiple_Result>{body}</ReadMultiple_Result></ReadMultiple_Result></Soap:Body></Soap:Envelope>"#
    )
}

async fn mount(server: &MockServer, store: &str, watermark: i64, records: &[(&str, &str)]) {
    Mock::given(method("POST"))
        .and(path(format!("/{store}/Page/WebSalesShipment")))
        .and(body_string_contains(format!("<ws:Criteria>&gt;{watermark}</ws:Criteria>")))
        .respond_with(ResponseTemplate::new(200).set_body_string(shipments_response(records)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn import_then_dispatch() {
    let server = MockServer::start().await;
    mount(&server, "eu", 0, &[("1002", "2023-02-02"), ("1001", "2023-02-01")]).await;
    mount(&server, "us", 0, &[("501", "2023-03-10")]).await;
    mount(&server, "eu", 1002, &[]).await;
    mount(&server, "us", 501, &[]).await;

    let nav = NavClient::new(&NavConfig {
        username: "svc".into(),
        password: SecretString::from("secret"),
        base_url: server.uri(),
        eu_store: "/eu".into(),
        us_store: "/us".into(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mailer = Arc::new(RecordingMailer::default());
    let importer = ShipmentImporter::new(db.clone(), Arc::new(nav));
    let dispatcher = SurveyDispatcher::new(
        db.clone(),
        mailer.clone(),
        "https://survey.example.com",
        "rsvp@hem.com",
    );
    let today = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();

    let report = scheduler::run_once(&importer, &dispatcher, today).await.unwrap();

    assert_eq!(report.import.imported(), 3);
    assert_eq!(report.dispatch.sent, 3);
    assert_eq!(report.dispatch.skipped, 0);

    let regions = db.list_regions().await.unwrap();
    let eu = db.get_watermark(regions[0].id).await.unwrap().unwrap();
    let us = db.get_watermark(regions[1].id).await.unwrap().unwrap();
    assert_eq!(eu.last_import_no, 1002);
    assert_eq!(us.last_import_no, 501);

    let sent = mailer.sent.lock().unwrap().clone();
    let senders: Vec<_> = sent.iter().map(|e| e.from_name.as_str()).collect();
    assert_eq!(senders, vec!["Mathilda at Hem", "Mathilda at Hem", "Theresa at Hem"]);
    assert!(db.list_shipments_by_status(NpsStatus::Pending).await.unwrap().is_empty());

    // Second pass asks above the new watermarks and finds nothing
    let again = scheduler::run_once(&importer, &dispatcher, today).await.unwrap();
    assert_eq!(again.import.imported(), 0);
    assert_eq!(again.dispatch.pending, 0);
    assert_eq!(mailer.sent.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("nps.db");

    {
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let region = db.upsert_region("eu").await.unwrap();
        db.advance_watermark(region.id, 77).await.unwrap();
        db.upsert_user("kept@example.com", Some(region.id)).await.unwrap();
        db.set_user_surveyable("kept@example.com", false).await.unwrap();
    }

    let db = LibSqlBackend::new_local(&path).await.unwrap();
    let regions = db.list_regions().await.unwrap();
    assert_eq!(regions.len(), 2);
    let wm = db.get_watermark(regions[0].id).await.unwrap().unwrap();
    assert_eq!(wm.last_import_no, 77);
    let user = db.get_user_by_email("kept@example.com").await.unwrap().unwrap();
    assert!(!user.surveyable);
}
