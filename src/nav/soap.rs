//! SOAP 1.1 envelope building and response decoding for the NAV
//! WebSalesShipment page service.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::error::RemoteError;
use crate::nav::filter::ShipmentFilter;

/// XML namespace of the WebSalesShipment page.
pub const PAGE_NAMESPACE: &str = "urn:microsoft-dynamics-schemas/page/websalesshipment";

/// `SOAPAction` header value for `ReadMultiple`.
pub fn read_multiple_action() -> String {
    format!("{PAGE_NAMESPACE}:ReadMultiple")
}

/// Build a `ReadMultiple` request. `setSize` 0 asks for every matching record.
pub fn read_multiple_envelope(filters: &[ShipmentFilter]) -> String {
    let mut body = String::new();
    for filter in filters {
        body.push_str(&format!(
            "<ws:filter><ws:Field>{}</ws:Field><ws:Criteria>{}</ws:Criteria></ws:filter>",
            escape(filter.field),
            escape(filter.criteria.as_str())
        ));
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ws="{ns}">"#,
            "<soap:Body><ws:ReadMultiple>{body}",
            "<ws:bookmarkKey></ws:bookmarkKey><ws:setSize>0</ws:setSize>",
            "</ws:ReadMultiple></soap:Body></soap:Envelope>"
        ),
        ns = PAGE_NAMESPACE,
        body = body
    )
}

/// A shipment record as returned by NAV, fields still in wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteShipment {
    /// `No`, the numeric shipment identifier sent as text.
    pub no: String,
    /// `Shipment_Date` as `YYYY-MM-DD`.
    pub shipment_date: String,
}

impl RemoteShipment {
    pub fn number(&self) -> Result<i64, RemoteError> {
        self.no
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| RemoteError::InvalidRecord {
                field: "No".into(),
                value: self.no.clone(),
                reason: e.to_string(),
            })
    }

    pub fn date(&self) -> Result<chrono::NaiveDate, RemoteError> {
        chrono::NaiveDate::parse_from_str(self.shipment_date.trim(), "%Y-%m-%d").map_err(|e| {
            RemoteError::InvalidRecord {
                field: "Shipment_Date".into(),
                value: self.shipment_date.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Clone, Copy)]
enum Field {
    No,
    ShipmentDate,
}

/// Decode state for one `ReadMultiple` response.
#[derive(Default)]
struct Decoder {
    shipments: Vec<RemoteShipment>,
    current: Option<RemoteShipment>,
    /// Element depth of the open `WebSalesShipment`.
    record_depth: Option<usize>,
    field: Option<Field>,
    in_fault_string: bool,
    fault: Option<String>,
    saw_result: bool,
}

impl Decoder {
    /// `No` and `Shipment_Date` count only as direct children of the record;
    /// nested line parts carry their own `No`.
    fn start(&mut self, name: &[u8], depth: usize) {
        let direct_child = self.record_depth.is_some_and(|d| depth == d + 1);
        match name {
            b"ReadMultiple_Result" => self.saw_result = true,
            b"WebSalesShipment" if self.current.is_none() => {
                self.current = Some(RemoteShipment::default());
                self.record_depth = Some(depth);
            }
            b"No" if direct_child => self.field = Some(Field::No),
            b"Shipment_Date" if direct_child => self.field = Some(Field::ShipmentDate),
            b"faultstring" => self.in_fault_string = true,
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8], depth: usize) {
        match name {
            b"WebSalesShipment" if self.record_depth == Some(depth) => {
                if let Some(record) = self.current.take() {
                    self.shipments.push(record);
                }
                self.record_depth = None;
            }
            b"No" | b"Shipment_Date" => self.field = None,
            b"faultstring" => self.in_fault_string = false,
            _ => {}
        }
    }

    fn text(&mut self, text: String) {
        if let (Some(f), Some(record)) = (self.field, self.current.as_mut()) {
            match f {
                Field::No => record.no = text,
                Field::ShipmentDate => record.shipment_date = text,
            }
        } else if self.in_fault_string {
            self.fault = Some(text);
        }
    }
}

/// Decode a `ReadMultiple` response body.
///
/// An empty `ReadMultiple_Result` yields an empty vec. A SOAP fault yields
/// `RemoteError::Fault`.
pub fn parse_read_multiple(xml: &str) -> Result<Vec<RemoteShipment>, RemoteError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut decoder = Decoder::default();
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| RemoteError::InvalidResponse(format!("malformed XML: {e}")))?;

        match event {
            Event::Start(e) => {
                depth += 1;
                decoder.start(e.local_name().as_ref(), depth);
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"ReadMultiple_Result" {
                    decoder.saw_result = true;
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| RemoteError::InvalidResponse(format!("bad text node: {e}")))?;
                decoder.text(text.into_owned());
            }
            Event::CData(t) => {
                let text = String::from_utf8(t.into_inner().into_owned())
                    .map_err(|e| RemoteError::InvalidResponse(format!("bad CDATA node: {e}")))?;
                decoder.text(text);
            }
            Event::End(e) => {
                decoder.end(e.local_name().as_ref(), depth);
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(fault) = decoder.fault {
        return Err(RemoteError::Fault(fault));
    }
    if !decoder.saw_result {
        return Err(RemoteError::InvalidResponse(
            "missing ReadMultiple_Result element".into(),
        ));
    }
    Ok(decoder.shipments)
}
