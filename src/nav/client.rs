use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};

use crate::config::NavConfig;
use crate::error::RemoteError;
use crate::model::RegionCode;
use crate::nav::filter::ShipmentFilter;
use crate::nav::soap::{self, RemoteShipment};

/// Longest response body kept in an HTTP error.
const MAX_ERROR_BODY: usize = 512;

/// Where the importer gets remote shipments from.
#[async_trait]
pub trait ShipmentSource: Send + Sync {
    /// Fetch every shipment of `region` matching all `filters`, in the order
    /// the remote returns them.
    async fn fetch_shipments(
        &self,
        region: RegionCode,
        filters: &[ShipmentFilter],
    ) -> Result<Vec<RemoteShipment>, RemoteError>;
}

/// SOAP client for the NAV WebSalesShipment page.
///
/// Built once at startup; holds the HTTP client and the basic-auth
/// credentials shared by both region endpoints.
#[derive(Clone)]
pub struct NavClient {
    client: reqwest::Client,
    username: String,
    password: SecretString,
    eu_url: String,
    us_url: String,
}

impl NavClient {
    pub fn new(config: &NavConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
            eu_url: config.eu_url(),
            us_url: config.us_url(),
        })
    }

    pub fn url_for(&self, region: RegionCode) -> &str {
        match region {
            RegionCode::Eu => &self.eu_url,
            RegionCode::Us => &self.us_url,
        }
    }
}

#[async_trait]
impl ShipmentSource for NavClient {
    async fn fetch_shipments(
        &self,
        region: RegionCode,
        filters: &[ShipmentFilter],
    ) -> Result<Vec<RemoteShipment>, RemoteError> {
        let url = self.url_for(region);
        tracing::debug!(%region, url, ?filters, "NAV ReadMultiple");

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", soap::read_multiple_action())
            .body(soap::read_multiple_envelope(filters))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // NAV reports bad filters etc. as a SOAP fault with HTTP 500
            if let Err(RemoteError::Fault(message)) = soap::parse_read_multiple(&body) {
                return Err(RemoteError::Fault(message));
            }
            return Err(RemoteError::Http {
                status,
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        soap::parse_read_multiple(&body)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
