// Copyright (c) 2025, The Integreat Authors
// MIT License
// All rights reserved.

//! # Sending Actions to the Queue
//!
//! This module wraps an action in a job envelope and publishes it to the
//! namespace's exchange. The envelope carries the job id, creation timestamp,
//! and namespace alongside the action, with the id injected into the action's
//! meta so sender and receiver agree on it. Messages are published persistent
//! with a JSON content type and an empty routing key.

use std::time::{SystemTime, UNIX_EPOCH};

use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties};
use tracing::{debug, error};
use uuid::Uuid;

use crate::connection::Connection;
use crate::errors::{Precondition, TransporterError};
use crate::types::{Action, Job, JobWithAction, Meta, Response};

/// Content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode marking a message persistent
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publishes an action as a job on the connection's exchange.
///
/// Fails without touching the broker when the connection is absent or
/// unusable, or when no action is given. On success the returned data is the
/// job's id, timestamp, and namespace; exactly one message has then been
/// enqueued.
pub async fn send(action: Option<Action>, connection: Option<&Connection>) -> Response<Job> {
    let Some(conn) = connection else {
        debug!("cannot send action to queue: no connection");
        return Response::fail(TransporterError::SendPrecondition(
            Precondition::NoConnection,
        ));
    };

    let Some((channel, exchange_name, namespace)) = conn.queue_fields() else {
        debug!(
            namespace = conn.namespace.as_str(),
            "cannot send action to queue: missing queue, exchange name, or namespace"
        );
        return Response::fail(TransporterError::SendPrecondition(
            Precondition::MissingQueueFields,
        ));
    };

    let Some(action) = action else {
        debug!(namespace, "error sending to queue: no valid action");
        return Response::fail(TransporterError::InvalidAction);
    };

    let envelope = make_envelope(action, namespace);
    let payload = match serde_json::to_vec(&envelope) {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = err.to_string(), namespace, "error serializing job");
            return Response::fail(TransporterError::PublishFailed(err.to_string()));
        }
    };

    let job = Job {
        id: envelope.id,
        timestamp: envelope.timestamp,
        namespace: envelope.namespace,
    };

    match channel
        .basic_publish(
            exchange_name,
            "",
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default()
                .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                .with_delivery_mode(PERSISTENT_DELIVERY_MODE),
        )
        .await
    {
        Ok(_confirm) => {
            debug!(id = job.id.as_str(), namespace, "added job to queue");
            Response::ok(job)
        }
        Err(err) => {
            error!(error = err.to_string(), namespace, "error sending to queue");
            Response::fail(TransporterError::PublishFailed(err.to_string()))
        }
    }
}

/// Builds the wire envelope for an action.
///
/// Uses the action's `meta.id` as job id when present, otherwise generates a
/// fresh one, and injects the id back into the action's meta. The timestamp
/// is the current time in epoch milliseconds.
pub(crate) fn make_envelope(mut action: Action, namespace: &str) -> JobWithAction {
    let id = action
        .meta
        .as_ref()
        .and_then(|meta| meta.id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    action.meta.get_or_insert_with(Meta::default).id = Some(id.clone());

    JobWithAction {
        id,
        timestamp: now_millis(),
        namespace: namespace.to_owned(),
        action,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
