// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async IPP client for querying discovered endpoints.
//
// Uses the `ipp` crate's async API to send:
//   - Get-Printer-Attributes  (RFC 8011 §4.2.5)
//   - Get-System-Attributes   (PWG 5100.22 §7.2.2)
//   - Get-Printers            (PWG 5100.22 §7.2.3)
//
// The two System Service operations are not modelled by the `ipp` crate, so
// requests are built here with the raw operation codes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ipp::operation::IppOperation;
use ipp::prelude::*;
use tracing::{debug, instrument};

use printwatch_core::config::DiscoveryConfig;
use printwatch_core::error::{PrintwatchError, Result};
use printwatch_core::types::ObjectKind;

/// Get-Printer-Attributes operation code.
pub const OP_GET_PRINTER_ATTRIBUTES: u16 = 0x000B;
/// Get-Printers operation code.
pub const OP_GET_PRINTERS: u16 = 0x004F;
/// Get-System-Attributes operation code.
pub const OP_GET_SYSTEM_ATTRIBUTES: u16 = 0x005B;

/// Attributes requested from an IPP System object.
pub const SYSTEM_ATTRIBUTES: &[&str] = &[
    "system-state",
    "system-make-and-model",
    "system-dns-sd-name",
    "system-location",
    "system-geo-location",
];

/// Attributes requested from a printer object.
pub const PRINTER_ATTRIBUTES: &[&str] = &[
    "printer-state",
    "printer-make-and-model",
    "printer-dns-sd-name",
    "printer-location",
    "printer-geo-location",
    "printer-more-info",
    "printer-supply-info-uri",
];

/// Attributes to request for an object of `kind`.
pub fn requested_attributes(kind: ObjectKind) -> &'static [&'static str] {
    match kind {
        ObjectKind::System => SYSTEM_ATTRIBUTES,
        ObjectKind::Printer => PRINTER_ATTRIBUTES,
    }
}

/// Attributes returned by an attributes query, flattened to
/// attribute-name → display string.
pub type AttributeMap = HashMap<String, String>;

/// Member printers reported by a Get-Printers response.
///
/// Names and URIs arrive as two independent lists and must line up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrinterListing {
    pub names: Vec<String>,
    pub uris: Vec<String>,
}

impl PrinterListing {
    /// Pair names with URIs, rejecting listings whose lengths differ.
    pub fn into_pairs(self) -> Result<Vec<(String, String)>> {
        if self.names.len() != self.uris.len() {
            return Err(PrintwatchError::InvalidSystemListing {
                names: self.names.len(),
                uris: self.uris.len(),
            });
        }
        Ok(self.names.into_iter().zip(self.uris).collect())
    }
}

/// Printing-protocol boundary used by the attribute fetcher.
#[async_trait]
pub trait AttributeClient: Send + Sync {
    /// Query the system or printer object at `uri` for its attributes.
    async fn get_attributes(&self, uri: &str, kind: ObjectKind) -> Result<AttributeMap>;

    /// List the member printers of the IPP System at `system_uri`.
    async fn get_printers(&self, system_uri: &str) -> Result<PrinterListing>;
}

/// Async IPP client wrapping the `ipp` crate.
///
/// Not bound to one endpoint: every call names its target URI, and a fresh
/// connection is made per request.
#[derive(Debug, Clone)]
pub struct IppClient {
    /// Sent as `requesting-user-name`.
    requesting_user: String,
    /// Upper bound for one request/response exchange.
    timeout: Duration,
    /// Accept self-signed certificates on `ipps://` endpoints.
    ignore_tls_errors: bool,
}

impl IppClient {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            requesting_user: config.requesting_user_name.clone(),
            timeout: config.request_timeout(),
            ignore_tls_errors: config.ignore_tls_errors,
        }
    }

    /// Send one request and check its status.
    async fn send(&self, uri: &Uri, operation: &'static str, request: ObjectRequest) -> Result<IppRequestResponse> {
        let client = AsyncIppClient::builder(uri.clone())
            .ignore_tls_errors(self.ignore_tls_errors)
            .build();

        debug!("sending {operation}");
        let response = tokio::time::timeout(self.timeout, client.send(request))
            .await
            .map_err(|_| {
                PrintwatchError::IppRequest(format!(
                    "{operation}: timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| PrintwatchError::IppRequest(format!("{operation}: {e}")))?;

        let code = response.header().status_code();
        if !code.is_success() {
            debug!(status = ?code, "{operation} rejected");
            return Err(PrintwatchError::IppStatus {
                operation: operation.into(),
                status: format!("{code:?}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AttributeClient for IppClient {
    #[instrument(skip(self), fields(uri = %uri, kind = ?kind))]
    async fn get_attributes(&self, uri: &str, kind: ObjectKind) -> Result<AttributeMap> {
        let parsed = parse_uri(uri)?;
        let (operation, code) = match kind {
            ObjectKind::System => ("Get-System-Attributes", OP_GET_SYSTEM_ATTRIBUTES),
            ObjectKind::Printer => ("Get-Printer-Attributes", OP_GET_PRINTER_ATTRIBUTES),
        };
        let request = ObjectRequest {
            operation: code,
            target_attribute: kind.target_attribute(),
            uri: parsed.clone(),
            requesting_user: self.requesting_user.clone(),
            requested: requested_attributes(kind),
        };

        let response = self.send(&parsed, operation, request).await?;
        let attrs = flatten_attributes(response.attributes());
        debug!(count = attrs.len(), "received attributes");
        Ok(attrs)
    }

    #[instrument(skip(self), fields(uri = %system_uri))]
    async fn get_printers(&self, system_uri: &str) -> Result<PrinterListing> {
        let parsed = parse_uri(system_uri)?;
        let request = ObjectRequest {
            operation: OP_GET_PRINTERS,
            target_attribute: ObjectKind::System.target_attribute(),
            uri: parsed.clone(),
            requesting_user: self.requesting_user.clone(),
            requested: &["printer-name", "printer-uri-supported"],
        };

        let response = self.send(&parsed, "Get-Printers", request).await?;
        let listing = parse_printer_listing(response.attributes());
        debug!(
            names = listing.names.len(),
            uris = listing.uris.len(),
            "received printer listing"
        );
        Ok(listing)
    }
}

/// A request addressed to one system or printer object.
struct ObjectRequest {
    operation: u16,
    /// `system-uri` or `printer-uri`.
    target_attribute: &'static str,
    uri: Uri,
    requesting_user: String,
    /// Sent as `requested-attributes` when non-empty.
    requested: &'static [&'static str],
}

impl IppOperation for ObjectRequest {
    fn into_ipp_request(self) -> IppRequestResponse {
        // Start from a stock request for the charset/language attributes,
        // then retarget the operation code.  No URI is passed here because
        // the stock constructor would add it as `printer-uri`.
        let mut request =
            IppRequestResponse::new(self.version(), Operation::GetPrinterAttributes, None);
        request.header_mut().operation_or_status = self.operation;

        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(self.target_attribute, IppValue::Uri(self.uri.to_string().into())),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requesting-user-name",
                IppValue::NameWithoutLanguage(self.requesting_user.into()),
            ),
        );
        if !self.requested.is_empty() {
            let keywords = self
                .requested
                .iter()
                .map(|name| IppValue::Keyword((*name).into()))
                .collect();
            request.attributes_mut().add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new("requested-attributes", IppValue::Array(keywords)),
            );
        }
        request
    }
}

// ---------------------------------------------------------------------------
// Helper functions for parsing IPP responses
// ---------------------------------------------------------------------------

fn parse_uri(uri: &str) -> Result<Uri> {
    let parsed: Uri = uri.parse().map_err(|e| PrintwatchError::InvalidUri {
        uri: uri.to_owned(),
        reason: format!("{e}"),
    })?;
    Ok(parsed)
}

/// Flatten every non-operation attribute group into a single map.
fn flatten_attributes(attrs: &IppAttributes) -> AttributeMap {
    let mut map = HashMap::new();
    for group in attrs.groups() {
        if group.tag() == DelimiterTag::OperationAttributes {
            continue;
        }
        for (name, attr) in group.attributes() {
            map.insert(name.clone(), render_value(name, attr.value()));
        }
    }
    map
}

/// Collect `printer-name` and `printer-uri-supported` from each Printer
/// Attributes group.  The lists are kept independent so that a malformed
/// response shows up as a length mismatch.
fn parse_printer_listing(attrs: &IppAttributes) -> PrinterListing {
    let mut listing = PrinterListing::default();
    for group in attrs.groups_of(DelimiterTag::PrinterAttributes) {
        let attributes = group.attributes();
        if let Some(name) = attributes.get("printer-name") {
            listing.names.push(render_value("printer-name", name.value()));
        }
        if let Some(uri) = attributes.get("printer-uri-supported") {
            listing.uris.push(render_value("printer-uri-supported", uri.value()));
        }
    }
    listing
}

/// Render one attribute value.  State enums become their keyword and
/// multi-valued attributes contribute their first value.
fn render_value(name: &str, value: &IppValue) -> String {
    match value {
        IppValue::Enum(v) | IppValue::Integer(v) if name.ends_with("-state") => state_keyword(*v)
            .map(str::to_owned)
            .unwrap_or_else(|| v.to_string()),
        IppValue::Array(values) => values
            .first()
            .map(|v| render_value(name, v))
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Keyword for `printer-state` / `system-state` (RFC 8011 §5.4.11).
fn state_keyword(value: i32) -> Option<&'static str> {
    match value {
        3 => Some("idle"),
        4 => Some("processing"),
        5 => Some("stopped"),
        _ => None,
    }
}
