//! Filter predicates for the WebSalesShipment `ReadMultiple` call.

use chrono::{Duration, NaiveDate};

/// Date format NAV expects inside filter criteria: `MMDDYYYY`.
const CRITERIA_DATE_FORMAT: &str = "%m%d%Y";

/// Shipments younger than this are left for a later run.
pub const MIN_SHIPMENT_AGE_DAYS: i64 = 30;

/// Shipments older than this are never imported.
pub const MAX_SHIPMENT_AGE_DAYS: i64 = 365;

/// One `{Field, Criteria}` pair of a NAV page filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentFilter {
    pub field: &'static str,
    pub criteria: String,
}

impl ShipmentFilter {
    /// Shipments numbered strictly above the watermark.
    pub fn number_above(watermark: i64) -> Self {
        Self {
            field: "No",
            criteria: format!(">{watermark}"),
        }
    }

    /// Shipments whose date falls inside the window (inclusive).
    pub fn shipped_within(window: &DateWindow) -> Self {
        Self {
            field: "Shipment_Date",
            criteria: window.criteria(),
        }
    }
}

/// Inclusive shipment-date range relative to "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    /// `[today - 365 days, today - 30 days]`.
    pub fn ending(today: NaiveDate) -> Self {
        Self {
            from: today - Duration::days(MAX_SHIPMENT_AGE_DAYS),
            to: today - Duration::days(MIN_SHIPMENT_AGE_DAYS),
        }
    }

    /// NAV range criteria, e.g. `06152022..05162023`.
    pub fn criteria(&self) -> String {
        format!(
            "{}..{}",
            self.from.format(CRITERIA_DATE_FORMAT),
            self.to.format(CRITERIA_DATE_FORMAT)
        )
    }
}

/// The two filters sent with every import request.
pub fn import_filters(watermark: i64, today: NaiveDate) -> [ShipmentFilter; 2] {
    [
        ShipmentFilter::number_above(watermark),
        ShipmentFilter::shipped_within(&DateWindow::ending(today)),
    ]
}
