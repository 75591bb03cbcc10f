// Copyright (c) 2025, The Integreat Authors
// MIT License
// All rights reserved.

//! # Listening for Jobs
//!
//! This module subscribes to the namespace's queue and dispatches every
//! delivered job to the framework. The listen call only reports subscription
//! setup; message processing runs on background tasks, bounded by the
//! channel's prefetch limit.
//!
//! Each delivery is parsed as a job envelope. Bodies that aren't valid JSON
//! or lack an action are rejected without requeue, so poison messages don't
//! loop. For valid jobs the dispatch response status decides the outcome:
//! ok, queued, and noaction acknowledge the delivery; badrequest rejects it
//! without requeue; error and timeout reject it with requeue and leave
//! redelivery timing to the broker.

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicRejectOptions},
    types::FieldTable,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::errors::{Precondition, TransporterError};
use crate::types::{Dispatch, JobWithAction, Response, Status};

/// Handle to a running subscription.
///
/// Returned as the data of a successful listen. The consume loop keeps
/// running after listen returns; aborting the task or closing the channel
/// ends it.
#[derive(Debug)]
pub struct Subscription {
    /// Broker-assigned identifier for the subscription
    pub consumer_tag: String,
    /// The background task driving the consume loop
    pub task: JoinHandle<()>,
}

/// What to do with a delivery once its job has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckDecision {
    Ack,
    Reject { requeue: bool },
}

/// Subscribes to the connection's queue and dispatches incoming jobs.
///
/// Validates the connection and dispatch handler before creating the
/// subscription. Returns as soon as the consumer is registered; deliveries
/// are then handled concurrently on spawned tasks, up to the connection's
/// prefetch limit in flight.
pub async fn listen(
    dispatch: Option<Arc<dyn Dispatch>>,
    connection: Option<&Connection>,
) -> Response<Subscription> {
    let Some(conn) = connection else {
        debug!("cannot listen to queue: no connection");
        return Response::fail(TransporterError::ListenPrecondition(
            Precondition::NoConnection,
        ));
    };

    let Some((channel, _exchange_name, namespace)) = conn.queue_fields() else {
        debug!(
            namespace = conn.namespace.as_str(),
            "cannot listen to queue: missing queue, exchange name, or namespace"
        );
        return Response::fail(TransporterError::ListenPrecondition(
            Precondition::MissingQueueFields,
        ));
    };

    let Some(dispatch) = dispatch else {
        debug!(namespace, "cannot listen to queue: no dispatch");
        return Response::fail(TransporterError::ListenPrecondition(
            Precondition::NoDispatch,
        ));
    };

    let mut consumer = match channel
        .basic_consume(
            namespace,
            "",
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(
                error = err.to_string(),
                namespace, "error creating the consumer"
            );
            return Response::fail(TransporterError::ConsumeFailed(err.to_string()));
        }
    };

    let consumer_tag = consumer.tag().to_string();
    debug!(
        queue = namespace,
        consumer_tag = consumer_tag.as_str(),
        "listening to queue"
    );

    let task = tokio::spawn(async move {
        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    tokio::spawn(handle_delivery(dispatch.clone(), delivery));
                }
                Err(err) => error!(error = err.to_string(), "error receiving delivery"),
            }
        }
    });

    Response::ok(Subscription { consumer_tag, task })
}

async fn handle_delivery(dispatch: Arc<dyn Dispatch>, delivery: Delivery) {
    let decision = process_payload(dispatch.as_ref(), &delivery.data).await;
    apply_decision(&delivery, decision).await;
}

/// Parses a delivery body and dispatches its action.
///
/// A body that doesn't parse to a job with an action is a poison message and
/// is rejected without requeue; the dispatch handler is never invoked for it.
pub(crate) async fn process_payload(dispatch: &dyn Dispatch, payload: &[u8]) -> AckDecision {
    let Some(job) = parse_job(payload) else {
        warn!("rejected job with invalid JSON");
        return AckDecision::Reject { requeue: false };
    };

    let response = dispatch.dispatch(job.action).await;
    decision_for(response.status)
}

fn parse_job(payload: &[u8]) -> Option<JobWithAction> {
    serde_json::from_slice(payload).ok()
}

pub(crate) fn decision_for(status: Status) -> AckDecision {
    match status {
        Status::Ok | Status::Queued | Status::Noaction => AckDecision::Ack,
        Status::Badrequest => AckDecision::Reject { requeue: false },
        Status::Timeout | Status::Error => AckDecision::Reject { requeue: true },
    }
}

async fn apply_decision(delivery: &Delivery, decision: AckDecision) {
    match decision {
        AckDecision::Ack => {
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                error!(error = err.to_string(), "error acking message");
            }
        }
        AckDecision::Reject { requeue } => {
            if let Err(err) = delivery.reject(BasicRejectOptions { requeue }).await {
                error!(error = err.to_string(), "error rejecting message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, MockDispatch};
    use serde_json::json;

    fn job_payload(id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "timestamp": 1_640_995_200_000u64,
            "namespace": "ns1",
            "action": {
                "type": "SET",
                "payload": { "type": "entry" },
                "meta": { "id": id }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn listen_without_connection_fails() {
        let dispatch: Arc<dyn Dispatch> = Arc::new(MockDispatch::new());
        let response = listen(Some(dispatch), None).await;

        assert_eq!(response.status, Status::Error);
        assert_eq!(
            response.error.as_deref(),
            Some("Cannot listen to queue. No connection")
        );
    }

    #[tokio::test]
    async fn listen_without_channel_fails() {
        let conn = Connection {
            status: Status::Ok,
            namespace: "ns1".to_owned(),
            exchange_name: "ns1_exch".to_owned(),
            max_concurrency: 1,
            channel: None,
            connection: None,
            error: None,
        };
        let dispatch: Arc<dyn Dispatch> = Arc::new(MockDispatch::new());

        let response = listen(Some(dispatch), Some(&conn)).await;

        assert_eq!(response.status, Status::Error);
        assert_eq!(
            response.error.as_deref(),
            Some("Cannot listen to queue. Missing queue, exchange name, or namespace")
        );
    }

    #[tokio::test]
    async fn invalid_json_is_rejected_without_dispatching() {
        let mut dispatch = MockDispatch::new();
        dispatch.expect_dispatch().times(0);

        let decision = process_payload(&dispatch, b"Invalid").await;

        assert_eq!(decision, AckDecision::Reject { requeue: false });
    }

    #[tokio::test]
    async fn job_without_action_is_rejected_without_dispatching() {
        let mut dispatch = MockDispatch::new();
        dispatch.expect_dispatch().times(0);

        let payload =
            serde_json::to_vec(&json!({ "id": "job1", "timestamp": 0, "namespace": "ns1" }))
                .unwrap();
        let decision = process_payload(&dispatch, &payload).await;

        assert_eq!(decision, AckDecision::Reject { requeue: false });
    }

    #[tokio::test]
    async fn successful_dispatch_acks_the_delivery() {
        let mut dispatch = MockDispatch::new();
        dispatch
            .expect_dispatch()
            .withf(|action: &Action| {
                action.action_type == "SET"
                    && action.meta.as_ref().and_then(|m| m.id.as_deref()) == Some("job1")
            })
            .times(1)
            .returning(|_| Response::ok(json!([])));

        let decision = process_payload(&dispatch, &job_payload("job1")).await;

        assert_eq!(decision, AckDecision::Ack);
    }

    #[tokio::test]
    async fn failed_dispatch_requeues_the_delivery() {
        let mut dispatch = MockDispatch::new();
        dispatch.expect_dispatch().times(1).returning(|_| Response {
            status: Status::Error,
            data: None,
            error: Some("Something went wrong".to_owned()),
        });

        let decision = process_payload(&dispatch, &job_payload("job2")).await;

        assert_eq!(decision, AckDecision::Reject { requeue: true });
    }

    #[test]
    fn decisions_follow_the_dispatch_status() {
        assert_eq!(decision_for(Status::Ok), AckDecision::Ack);
        assert_eq!(decision_for(Status::Queued), AckDecision::Ack);
        assert_eq!(decision_for(Status::Noaction), AckDecision::Ack);
        assert_eq!(
            decision_for(Status::Badrequest),
            AckDecision::Reject { requeue: false }
        );
        assert_eq!(
            decision_for(Status::Error),
            AckDecision::Reject { requeue: true }
        );
        assert_eq!(
            decision_for(Status::Timeout),
            AckDecision::Reject { requeue: true }
        );
    }
}
