//! Shipment NPS: imports ERP shipments per region and sends NPS survey emails.

pub mod config;
pub mod error;
pub mod importer;
pub mod model;
pub mod nav;
pub mod scheduler;
pub mod store;
pub mod survey;
