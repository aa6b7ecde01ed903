//! Typed request/reply invocation.
//!
//! Sends one request on a session and synchronously awaits exactly one
//! reply, either as the generic result envelope or decoded into a specific
//! domain type. Transport, timeout and decode failures surface uniformly as
//! [`ChannelError`].

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::channel::ChannelSession;
use crate::error::{ChannelError, Result};
use crate::messages::{ResultEnvelope, ValidateResponse, ValidationRequest};
use crate::wire;

/// One typed request: wire tag, encoded payload, per-call timeout.
#[derive(Debug, Clone)]
pub struct Request {
    pub content_type: i32,
    pub body: Bytes,
    pub timeout: Duration,
}

impl Request {
    pub fn new(content_type: i32, body: Bytes, timeout: Duration) -> Self {
        Self {
            content_type,
            body,
            timeout,
        }
    }
}

/// Send a request acknowledged by the generic result envelope.
pub async fn send_and_await_result(
    session: &ChannelSession,
    request: Request,
) -> Result<ResultEnvelope> {
    let reply = session
        .send_request(request.content_type, request.body, request.timeout)
        .await?;
    if reply.content_type != wire::RESULT_TYPE {
        return Err(ChannelError::UnexpectedResponse {
            expected: wire::RESULT_TYPE,
            actual: reply.content_type,
        });
    }
    wire::decode_body(&reply.body)
}

/// Send a request and decode the single reply as `T`, which must arrive
/// under `expected_type`.
pub async fn send_and_await_typed<T: DeserializeOwned>(
    session: &ChannelSession,
    request: Request,
    expected_type: i32,
) -> Result<T> {
    let reply = session
        .send_request(request.content_type, request.body, request.timeout)
        .await?;
    if reply.content_type != expected_type {
        return Err(ChannelError::UnexpectedResponse {
            expected: expected_type,
            actual: reply.content_type,
        });
    }
    wire::decode_body(&reply.body)
}

/// Send the initiating request of a fan-out validation and await the
/// acknowledgement declaring how many detail messages to expect. A reply
/// with `success == false` is surfaced as the peer's message; the caller
/// must not start aggregation in that case.
pub async fn begin_validation(
    session: &ChannelSession,
    request: &ValidationRequest,
    timeout: Duration,
) -> Result<ValidateResponse> {
    let body = request.encode_body()?;
    let response: ValidateResponse = send_and_await_typed(
        session,
        Request::new(request.content_type(), body, timeout),
        request.response_content_type(),
    )
    .await?;
    if !response.success {
        return Err(ChannelError::Remote(response.message));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::transport_pair;
    use crate::channel::{SessionBindings, TransportReader, TransportWriter};
    use crate::messages::ValidateRouterLinksRequest;
    use crate::wire::Envelope;

    fn session_with_scripted_reply(
        reply_content_type: i32,
        reply_body: Bytes,
    ) -> ChannelSession {
        let ((cw, cr), (mut sw, mut sr)) = transport_pair();
        let session = ChannelSession::start(cw, cr, SessionBindings::new(), Duration::from_secs(1));
        tokio::spawn(async move {
            if let Ok(Some(frame)) = sr.next_frame().await {
                let request = Envelope::decode(frame).expect("decode request");
                let reply = Envelope::reply_to(request.sequence, reply_content_type, reply_body);
                let _ = sw.send_frame(reply.encode()).await;
            }
        });
        session
    }

    fn links_request(timeout: Duration) -> (ValidationRequest, Request) {
        let validation = ValidationRequest::RouterLinks(ValidateRouterLinksRequest {
            filter: String::new(),
        });
        let body = validation.encode_body().expect("encode");
        let request = Request::new(validation.content_type(), body, timeout);
        (validation, request)
    }

    #[tokio::test]
    async fn test_result_envelope_path() {
        let body = wire::encode_body(&ResultEnvelope {
            success: true,
            message: "event streaming started".to_string(),
        })
        .expect("encode");
        let session = session_with_scripted_reply(wire::RESULT_TYPE, body);

        let (_, request) = links_request(Duration::from_secs(1));
        let result = send_and_await_result(&session, request).await.expect("ack");
        assert!(result.success);
        assert_eq!(result.message, "event streaming started");
    }

    #[tokio::test]
    async fn test_unexpected_response_type() {
        let body = wire::encode_body(&ResultEnvelope {
            success: true,
            message: String::new(),
        })
        .expect("encode");
        let session = session_with_scripted_reply(wire::RESULT_TYPE, body);

        let (validation, request) = links_request(Duration::from_secs(1));
        let err = send_and_await_typed::<ValidateResponse>(
            &session,
            request,
            validation.response_content_type(),
        )
        .await
        .expect_err("wrong content type");
        assert!(matches!(err, ChannelError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_decode_failure_surfaces() {
        let session = session_with_scripted_reply(
            wire::VALIDATE_ROUTER_LINKS_RESPONSE,
            Bytes::from_static(b"not json"),
        );

        let (validation, request) = links_request(Duration::from_secs(1));
        let err = send_and_await_typed::<ValidateResponse>(
            &session,
            request,
            validation.response_content_type(),
        )
        .await
        .expect_err("bad body");
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[tokio::test]
    async fn test_begin_validation_success() {
        let body = wire::encode_body(&ValidateResponse {
            success: true,
            message: String::new(),
            component_count: 12,
        })
        .expect("encode");
        let session = session_with_scripted_reply(wire::VALIDATE_ROUTER_LINKS_RESPONSE, body);

        let (validation, _) = links_request(Duration::from_secs(1));
        let response = begin_validation(&session, &validation, Duration::from_secs(1))
            .await
            .expect("started");
        assert_eq!(response.component_count, 12);
    }

    #[tokio::test]
    async fn test_begin_validation_remote_failure_short_circuits() {
        let body = wire::encode_body(&ValidateResponse {
            success: false,
            message: "no components matched filter".to_string(),
            component_count: 0,
        })
        .expect("encode");
        let session = session_with_scripted_reply(wire::VALIDATE_ROUTER_LINKS_RESPONSE, body);

        let (validation, _) = links_request(Duration::from_secs(1));
        let err = begin_validation(&session, &validation, Duration::from_secs(1))
            .await
            .expect_err("remote failure");
        match err {
            ChannelError::Remote(message) => {
                assert_eq!(message, "no components matched filter");
            }
            other => panic!("expected remote failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_reply_times_out() {
        let ((cw, cr), (_sw, _sr)) = transport_pair();
        let session = ChannelSession::start(cw, cr, SessionBindings::new(), Duration::from_secs(1));

        let (validation, _) = links_request(Duration::from_millis(50));
        let err = begin_validation(&session, &validation, Duration::from_millis(50))
            .await
            .expect_err("must time out");
        assert!(matches!(err, ChannelError::Timeout(_)));
    }
}
