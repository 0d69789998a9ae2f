use std::{fmt, sync::Arc};

use anyhow::Context as _;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use hyper::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing as log;

use crate::handlers::{Context, HandlerError};

pub mod event;

use event::{Event, PullRequestEvent};

/// The name of a webhook event.
#[derive(Debug, PartialEq, Eq)]
pub enum EventName {
    /// Pull request activity.
    ///
    /// This gets translated to [`Event::PullRequest`] when sent to a handler.
    ///
    /// <https://docs.github.com/en/webhooks/webhook-events-and-payloads#pull_request>
    PullRequest,
    /// Sent by GitHub when a webhook is created.
    ///
    /// <https://docs.github.com/en/webhooks/webhook-events-and-payloads#ping>
    Ping,
    /// All other unhandled webhooks.
    Other,
}

impl std::str::FromStr for EventName {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<EventName, Self::Err> {
        Ok(match s {
            "pull_request" => EventName::PullRequest,
            "ping" => EventName::Ping,
            _ => EventName::Other,
        })
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EventName::PullRequest => "pull_request",
                EventName::Ping => "ping",
                EventName::Other => "other",
            }
        )
    }
}

pub fn deserialize_payload<T: serde::de::DeserializeOwned>(v: &str) -> anyhow::Result<T> {
    let mut deserializer = serde_json::Deserializer::from_str(v);
    let res: Result<T, _> = serde_path_to_error::deserialize(&mut deserializer);
    match res {
        Ok(r) => Ok(r),
        Err(e) => {
            let ctx = format!("at {:?}", e.path().to_string());
            Err(e.into_inner()).context(ctx)
        }
    }
}

pub async fn webhook(
    headers: HeaderMap,
    State(ctx): State<Arc<Context>>,
    body: Bytes,
) -> Response {
    let Some(ev) = headers.get("X-GitHub-Event") else {
        log::error!("X-GitHub-Event header must be set");
        return (StatusCode::BAD_REQUEST, "X-GitHub-Event header must be set").into_response();
    };
    let Ok(ev) = ev.to_str() else {
        log::error!("X-GitHub-Event header must be UTF-8 encoded");
        return (
            StatusCode::BAD_REQUEST,
            "X-GitHub-Event header must be UTF-8 encoded",
        )
            .into_response();
    };
    let Ok(event) = ev.parse::<EventName>();

    log::debug!("event={event}");

    let Some(sig) = headers.get("X-Hub-Signature-256") else {
        log::error!("X-Hub-Signature-256 header must be set");
        return (
            StatusCode::BAD_REQUEST,
            "X-Hub-Signature-256 header must be set",
        )
            .into_response();
    };
    let Ok(signature) = sig.to_str() else {
        log::error!("X-Hub-Signature-256 header must be UTF-8 encoded");
        return (
            StatusCode::BAD_REQUEST,
            "X-Hub-Signature-256 header must be UTF-8 encoded",
        )
            .into_response();
    };

    if let Err(err) = check_payload_signed(&ctx.webhook_secret, signature, &body) {
        log::error!("check_payload_signed: {err}");
        return (StatusCode::FORBIDDEN, "Wrong signature").into_response();
    }

    let Ok(payload) = str::from_utf8(&body) else {
        log::error!("payload not utf-8");
        return (StatusCode::BAD_REQUEST, "Payload must be UTF-8").into_response();
    };

    match process_payload(event, payload, &ctx).await {
        Ok(true) => ("processed request",).into_response(),
        Ok(false) => ("ignored request",).into_response(),
        Err(err) => {
            log::error!("{err:?}");
            let body = format!("request failed: {err:?}");
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

async fn process_payload(event: EventName, payload: &str, ctx: &Context) -> anyhow::Result<bool> {
    let event = match event {
        EventName::PullRequest => {
            let payload = deserialize_payload::<PullRequestEvent>(payload)
                .context("failed to deserialize PullRequestEvent")?;

            log::info!(
                "handling pull request event {} #{} ({:?})",
                payload.repository.full_name(),
                payload.number,
                payload.action
            );

            Event::PullRequest(payload)
        }
        EventName::Ping => {
            log::info!("received ping");
            return Ok(false);
        }
        // Other events need not be handled
        EventName::Other => {
            return Ok(false);
        }
    };

    let errors = crate::handlers::handle(ctx, &event).await;
    if errors.is_empty() {
        return Ok(true);
    }
    for HandlerError { handler, error } in &errors {
        log::error!("handling event failed in {handler}: {error:?}");
    }
    Err(anyhow::anyhow!(
        "handling failed in {} handler(s), error logged",
        errors.len()
    ))
}

#[derive(Debug)]
pub struct SignedPayloadError;

impl fmt::Display for SignedPayloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "failed to validate payload")
    }
}

impl std::error::Error for SignedPayloadError {}

pub fn check_payload_signed(
    secret: &SecretString,
    signature: &str,
    payload: &[u8],
) -> Result<(), SignedPayloadError> {
    let signature = signature
        .strip_prefix("sha256=")
        .ok_or(SignedPayloadError)?;
    let signature = match hex::decode(signature) {
        Ok(e) => e,
        Err(e) => {
            log::trace!("hex decode failed for {signature:?}: {e:?}");
            return Err(SignedPayloadError);
        }
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SignedPayloadError)?;
    mac.update(payload);
    mac.verify_slice(&signature).map_err(|_| SignedPayloadError)
}
