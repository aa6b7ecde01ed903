//! Management message families.
//!
//! Each protocol family is a sealed Rust type; the mapping to wire-level
//! integer tags lives in the adapter methods here and nowhere else, so the
//! rest of the crate never handles raw content-type numbers.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::DetailRecord;
use crate::error::Result;
use crate::wire;

/// Generic acknowledgement returned for simple operations, carried under the
/// reserved result content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    pub message: String,
}

/// The single synchronous reply that starts a fan-out validation. When
/// `success` is false, `component_count` carries no meaning and aggregation
/// must not start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub success: bool,
    pub message: String,
    pub component_count: u64,
}

/// The kind of remote component a detail record reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Controller,
    Router,
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentType::Controller => write!(f, "controller"),
            ComponentType::Router => write!(f, "router"),
        }
    }
}

// --- validation requests ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateTerminatorsRequest {
    pub filter: String,
    pub fix_invalid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRouterLinksRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRouterDataModelRequest {
    pub router_filter: String,
    pub validate_ctrl: bool,
    pub fix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRouterSdkTerminatorsRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRouterErtTerminatorsRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateIdentityConnectionStatusesRequest {
    pub router_filter: String,
}

/// The validation request family. Variant payloads are what goes on the
/// wire; the adapter methods supply the tags for the request, its
/// acknowledgement, and the detail messages that follow.
#[derive(Debug, Clone)]
pub enum ValidationRequest {
    Terminators(ValidateTerminatorsRequest),
    RouterLinks(ValidateRouterLinksRequest),
    RouterDataModel(ValidateRouterDataModelRequest),
    RouterSdkTerminators(ValidateRouterSdkTerminatorsRequest),
    RouterErtTerminators(ValidateRouterErtTerminatorsRequest),
    IdentityConnectionStatuses(ValidateIdentityConnectionStatusesRequest),
}

impl ValidationRequest {
    pub fn label(&self) -> &'static str {
        match self {
            ValidationRequest::Terminators(_) => "terminators",
            ValidationRequest::RouterLinks(_) => "router-links",
            ValidationRequest::RouterDataModel(_) => "router-data-model",
            ValidationRequest::RouterSdkTerminators(_) => "router-sdk-terminators",
            ValidationRequest::RouterErtTerminators(_) => "router-ert-terminators",
            ValidationRequest::IdentityConnectionStatuses(_) => "identity-connection-statuses",
        }
    }

    pub fn content_type(&self) -> i32 {
        match self {
            ValidationRequest::Terminators(_) => wire::VALIDATE_TERMINATORS_REQUEST,
            ValidationRequest::RouterLinks(_) => wire::VALIDATE_ROUTER_LINKS_REQUEST,
            ValidationRequest::RouterDataModel(_) => wire::VALIDATE_ROUTER_DATA_MODEL_REQUEST,
            ValidationRequest::RouterSdkTerminators(_) => {
                wire::VALIDATE_ROUTER_SDK_TERMINATORS_REQUEST
            }
            ValidationRequest::RouterErtTerminators(_) => {
                wire::VALIDATE_ROUTER_ERT_TERMINATORS_REQUEST
            }
            ValidationRequest::IdentityConnectionStatuses(_) => {
                wire::VALIDATE_IDENTITY_CONNECTION_STATUSES_REQUEST
            }
        }
    }

    pub fn response_content_type(&self) -> i32 {
        match self {
            ValidationRequest::Terminators(_) => wire::VALIDATE_TERMINATORS_RESPONSE,
            ValidationRequest::RouterLinks(_) => wire::VALIDATE_ROUTER_LINKS_RESPONSE,
            ValidationRequest::RouterDataModel(_) => wire::VALIDATE_ROUTER_DATA_MODEL_RESPONSE,
            ValidationRequest::RouterSdkTerminators(_) => {
                wire::VALIDATE_ROUTER_SDK_TERMINATORS_RESPONSE
            }
            ValidationRequest::RouterErtTerminators(_) => {
                wire::VALIDATE_ROUTER_ERT_TERMINATORS_RESPONSE
            }
            ValidationRequest::IdentityConnectionStatuses(_) => {
                wire::VALIDATE_IDENTITY_CONNECTION_STATUSES_RESPONSE
            }
        }
    }

    pub fn detail_content_type(&self) -> i32 {
        match self {
            ValidationRequest::Terminators(_) => wire::TERMINATOR_DETAIL,
            ValidationRequest::RouterLinks(_) => wire::ROUTER_LINK_DETAILS,
            ValidationRequest::RouterDataModel(_) => wire::ROUTER_DATA_MODEL_DETAILS,
            ValidationRequest::RouterSdkTerminators(_) => wire::ROUTER_SDK_TERMINATORS_DETAILS,
            ValidationRequest::RouterErtTerminators(_) => wire::ROUTER_ERT_TERMINATORS_DETAILS,
            ValidationRequest::IdentityConnectionStatuses(_) => {
                wire::IDENTITY_CONNECTION_STATUSES_DETAILS
            }
        }
    }

    pub fn encode_body(&self) -> Result<Bytes> {
        match self {
            ValidationRequest::Terminators(request) => wire::encode_body(request),
            ValidationRequest::RouterLinks(request) => wire::encode_body(request),
            ValidationRequest::RouterDataModel(request) => wire::encode_body(request),
            ValidationRequest::RouterSdkTerminators(request) => wire::encode_body(request),
            ValidationRequest::RouterErtTerminators(request) => wire::encode_body(request),
            ValidationRequest::IdentityConnectionStatuses(request) => wire::encode_body(request),
        }
    }
}

// --- event streaming -------------------------------------------------------

/// One event-stream subscription. Options are a sorted map so encoded
/// requests are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscription {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl EventSubscription {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }
}

/// Starts event streaming; acknowledged with the generic result envelope,
/// followed by one message per event until the channel closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEventsRequest {
    pub format: String,
    pub subscriptions: Vec<EventSubscription>,
}

// --- detail records --------------------------------------------------------

/// Validation outcome for a single terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatorState {
    Valid,
    InvalidUnknownBinding,
    InvalidUnknownTerminator,
    InvalidBadState,
    Unknown,
}

impl TerminatorState {
    pub fn is_valid(self) -> bool {
        matches!(self, TerminatorState::Valid)
    }

    pub fn label(self) -> &'static str {
        match self {
            TerminatorState::Valid => "valid",
            TerminatorState::InvalidUnknownBinding => "invalid-unknown-binding",
            TerminatorState::InvalidUnknownTerminator => "invalid-unknown-terminator",
            TerminatorState::InvalidBadState => "invalid-bad-state",
            TerminatorState::Unknown => "unknown",
        }
    }
}

/// Per-terminator validation result, one message per terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminatorDetail {
    pub terminator_id: String,
    pub service_id: String,
    pub service_name: String,
    pub router_id: String,
    pub router_name: String,
    pub binding: String,
    pub address: String,
    pub host_id: String,
    /// RFC 3339 creation timestamp as reported by the controller.
    pub create_date: String,
    pub state: TerminatorState,
    /// True when the router repaired the terminator during this validation.
    pub fixed: bool,
    #[serde(default)]
    pub detail: String,
}

impl TerminatorDetail {
    pub fn create_date_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.create_date)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl DetailRecord for TerminatorDetail {
    fn component_id(&self) -> &str {
        &self.terminator_id
    }

    fn component_name(&self) -> &str {
        &self.service_name
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Router
    }

    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn sub_error_count(&self) -> usize {
        usize::from(!self.state.is_valid())
    }
}

/// Link state as seen from one side of the controller/router comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Established,
    Unknown,
}

impl LinkState {
    pub fn label(self) -> &'static str {
        match self {
            LinkState::Established => "established",
            LinkState::Unknown => "unknown",
        }
    }
}

/// One link compared between the controller's table and a router's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterLinkDetail {
    pub link_id: String,
    pub ctrl_state: LinkState,
    pub router_state: LinkState,
    pub dest_router_id: String,
    pub dest_connected: bool,
    pub dialed: bool,
    pub is_valid: bool,
}

/// Link validation result for one router, covering every link the router or
/// the controller attributes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterLinkDetails {
    pub router_id: String,
    pub router_name: String,
    pub validate_success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub link_details: Vec<RouterLinkDetail>,
}

impl DetailRecord for RouterLinkDetails {
    fn component_id(&self) -> &str {
        &self.router_id
    }

    fn component_name(&self) -> &str {
        &self.router_name
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Router
    }

    fn is_valid(&self) -> bool {
        self.validate_success && self.link_details.iter().all(|link| link.is_valid)
    }

    fn sub_error_count(&self) -> usize {
        if !self.validate_success {
            return 1;
        }
        self.link_details
            .iter()
            .filter(|link| !link.is_valid)
            .count()
    }
}

/// Shared detail shape for validations that report one record per component
/// with a flat error list (router data model, identity connection statuses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentValidationDetail {
    pub component_type: ComponentType,
    pub component_id: String,
    pub component_name: String,
    pub validate_success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl DetailRecord for ComponentValidationDetail {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn component_name(&self) -> &str {
        &self.component_name
    }

    fn component_type(&self) -> ComponentType {
        self.component_type
    }

    fn is_valid(&self) -> bool {
        self.validate_success && self.errors.is_empty()
    }

    fn sub_error_count(&self) -> usize {
        if !self.errors.is_empty() {
            self.errors.len()
        } else {
            usize::from(!self.validate_success)
        }
    }
}

/// One hosted terminator compared between controller and router state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterTerminatorDetail {
    pub terminator_id: String,
    pub ctrl_state: String,
    pub router_state: String,
    pub is_valid: bool,
    pub operation_active: bool,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub last_attempt: String,
}

/// Hosted-terminator validation result for one router, shared by the SDK and
/// ERT variants (distinct content types).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterTerminatorsDetails {
    pub router_id: String,
    pub router_name: String,
    pub validate_success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<RouterTerminatorDetail>,
}

impl DetailRecord for RouterTerminatorsDetails {
    fn component_id(&self) -> &str {
        &self.router_id
    }

    fn component_name(&self) -> &str {
        &self.router_name
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Router
    }

    fn is_valid(&self) -> bool {
        self.validate_success && self.details.iter().all(|detail| detail.is_valid)
    }

    fn sub_error_count(&self) -> usize {
        if !self.validate_success {
            return 1;
        }
        self.details.iter().filter(|detail| !detail.is_valid).count()
    }
}
