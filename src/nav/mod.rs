//! Remote ERP (Dynamics NAV) integration.
//!
//! - `filter`: the `No` / `Shipment_Date` filter predicates
//! - `soap`: `ReadMultiple` envelope and response decoding
//! - `client`: the HTTP client and the `ShipmentSource` seam

pub mod client;
pub mod filter;
pub mod soap;

pub use client::{NavClient, ShipmentSource};
pub use filter::{DateWindow, ShipmentFilter, import_filters};
pub use soap::RemoteShipment;
