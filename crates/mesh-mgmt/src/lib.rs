//! Management and diagnostics client for the mesh overlay control plane.
//!
//! The controller exposes a management endpoint speaking a typed-message
//! protocol over a persistent WebSocket channel. This crate implements the
//! client side of that protocol:
//!
//! - **Channel session**: one full-duplex connection with per-content-type
//!   receive handlers bound before the handshake, plus a close signal.
//! - **Request/reply invocation**: one typed request, one synchronous reply
//!   under a caller-supplied timeout.
//! - **Fan-out aggregation**: validation commands are acknowledged with an
//!   expected component count, then each remote component reports its own
//!   detail message asynchronously. A single generic aggregator consumes
//!   the stream until the count is reached, the channel closes, or a
//!   deadline expires.
//! - **Result presentation**: deterministic, sorted rendering and an exit
//!   status reflecting whether any component failed validation.
//!
//! The `meshctl` binary wires these together for the `validate` and
//! `stream events` commands.

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod error;
pub mod invoker;
pub mod messages;
pub mod render;
pub mod wire;

// Re-export key types for convenience
pub use aggregator::{
    AggregateOutcome, Completion, DetailRecord, ErrorCounting, FanoutAggregator,
};

pub use channel::{
    ChannelSession, SessionBindings, SessionConfig, TransportReader, TransportWriter,
};

pub use config::{ConfigError, Profile};

pub use error::{ChannelError, Result};

pub use invoker::{Request, begin_validation, send_and_await_result, send_and_await_typed};

pub use messages::{
    ComponentType, ComponentValidationDetail, EventSubscription, LinkState, ResultEnvelope,
    RouterLinkDetail, RouterLinkDetails, RouterTerminatorDetail, RouterTerminatorsDetails,
    StreamEventsRequest, TerminatorDetail, TerminatorState, ValidateIdentityConnectionStatusesRequest,
    ValidateResponse, ValidateRouterDataModelRequest, ValidateRouterErtTerminatorsRequest,
    ValidateRouterLinksRequest, ValidateRouterSdkTerminatorsRequest, ValidateTerminatorsRequest,
    ValidationRequest,
};

pub use render::{RenderDetail, exit_code, render_all, render_summary};
