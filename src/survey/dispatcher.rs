//! Survey dispatcher job: turns pending shipments into sent or skipped surveys.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{DatabaseError, Result};
use crate::model::{NpsStatus, Shipment};
use crate::store::Database;
use crate::survey::email::{self, OutboundEmail};
use crate::survey::mailer::Mailer;

/// Outcome of a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Pending shipments found at the start of the run.
    pub pending: usize,
    pub sent: usize,
    pub skipped: usize,
}

/// Sends one NPS survey per pending shipment.
///
/// Eligibility is the user's `surveyable` flag alone. The date of the last
/// survey email is recorded on the user but not consulted here.
pub struct SurveyDispatcher {
    store: Arc<dyn Database>,
    mailer: Arc<dyn Mailer>,
    base_url: String,
    from_address: String,
}

impl SurveyDispatcher {
    pub fn new(
        store: Arc<dyn Database>,
        mailer: Arc<dyn Mailer>,
        base_url: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mailer,
            base_url: base_url.into(),
            from_address: from_address.into(),
        }
    }

    /// Process every pending shipment in id order.
    ///
    /// The first failure stops the run; shipments after it stay `pending`
    /// for the next run.
    pub async fn dispatch(&self, today: NaiveDate) -> Result<DispatchReport> {
        let pending = self
            .store
            .list_shipments_by_status(NpsStatus::Pending)
            .await?;

        let mut report = DispatchReport {
            pending: pending.len(),
            ..Default::default()
        };

        for shipment in &pending {
            match self.process(shipment, today).await {
                Ok(NpsStatus::Sent) => report.sent += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!(
                        shipment_id = shipment.id,
                        number = shipment.number,
                        error = %e,
                        "NPS dispatch aborted"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            pending = report.pending,
            sent = report.sent,
            skipped = report.skipped,
            "NPS dispatch complete"
        );
        Ok(report)
    }

    async fn process(&self, shipment: &Shipment, today: NaiveDate) -> Result<NpsStatus> {
        let user = self
            .store
            .get_user(shipment.user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".into(),
                id: shipment.user_id.to_string(),
            })?;

        if !user.surveyable {
            self.store
                .update_shipment_status(shipment.id, NpsStatus::Skipped)
                .await?;
            debug!(shipment_id = shipment.id, user = %user.email, "User opted out, skipped");
            return Ok(NpsStatus::Skipped);
        }

        let request = self
            .store
            .insert_score_request(user.id, shipment.id)
            .await?;

        let outbound = OutboundEmail {
            to: user.email.clone(),
            from_name: email::sender_name(user.region_name.as_deref()).to_string(),
            from_address: self.from_address.clone(),
            subject: email::SUBJECT.to_string(),
            html_body: email::render_html(&request.uuid, &self.base_url),
        };
        self.mailer.send(&outbound).await?;

        self.store.mark_user_surveyed(user.id, today).await?;
        self.store
            .update_shipment_status(shipment.id, NpsStatus::Sent)
            .await?;

        debug!(
            shipment_id = shipment.id,
            request = %request.uuid,
            user = %user.email,
            "NPS email dispatched"
        );
        Ok(NpsStatus::Sent)
    }
}
