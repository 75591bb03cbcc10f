// Copyright (c) 2025, The Integreat Authors
// MIT License
// All rights reserved.

//! # Transporter Facade
//!
//! This module aggregates connection management, sending, and listening
//! behind the transporter contract the dispatch framework consumes: connect,
//! send, listen, disconnect, an options passthrough, and an authentication
//! type tag.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{self, Connection};
use crate::consumer::{self, Subscription};
use crate::publisher;
use crate::types::{Action, Authentication, Dispatch, EndpointOptions, Job, Response};

/// Tag identifying the authentication shape this transporter expects
pub const AUTHENTICATION: &str = "asObject";

/// The transporter contract consumed by the dispatch framework.
#[async_trait]
pub trait Transporter {
    /// The authentication scheme tag, when the transporter uses one.
    fn authentication(&self) -> Option<&'static str>;

    /// Normalizes endpoint options for a service.
    fn prepare_options(&self, options: EndpointOptions, service_id: &str) -> EndpointOptions;

    /// Establishes or reuses a broker connection.
    async fn connect(
        &self,
        options: &EndpointOptions,
        authentication: Option<&Authentication>,
        connection: Option<Connection>,
    ) -> Connection;

    /// Publishes an action as a job on the connection's namespace.
    async fn send(&self, action: Option<Action>, connection: Option<&Connection>) -> Response<Job>;

    /// Subscribes to the connection's namespace and dispatches incoming jobs.
    async fn listen(
        &self,
        dispatch: Option<Arc<dyn Dispatch>>,
        connection: Option<&Connection>,
    ) -> Response<Subscription>;

    /// Closes the connection's channel and broker connection.
    async fn disconnect(&self, connection: Option<Connection>);
}

/// RabbitMQ transporter for Integreat.
#[derive(Debug, Clone, Copy, Default)]
pub struct RabbitmqTransporter;

#[async_trait]
impl Transporter for RabbitmqTransporter {
    fn authentication(&self) -> Option<&'static str> {
        Some(AUTHENTICATION)
    }

    /// Returns the options unchanged, reserved for future normalization.
    fn prepare_options(&self, options: EndpointOptions, _service_id: &str) -> EndpointOptions {
        options
    }

    async fn connect(
        &self,
        options: &EndpointOptions,
        authentication: Option<&Authentication>,
        connection: Option<Connection>,
    ) -> Connection {
        connection::connect(options, authentication, connection).await
    }

    async fn send(&self, action: Option<Action>, connection: Option<&Connection>) -> Response<Job> {
        publisher::send(action, connection).await
    }

    async fn listen(
        &self,
        dispatch: Option<Arc<dyn Dispatch>>,
        connection: Option<&Connection>,
    ) -> Response<Subscription> {
        consumer::listen(dispatch, connection).await
    }

    async fn disconnect(&self, connection: Option<Connection>) {
        connection::disconnect(connection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    #[test]
    fn authentication_tag_is_as_object() {
        let transporter = RabbitmqTransporter;
        assert_eq!(transporter.authentication(), Some("asObject"));
    }

    #[test]
    fn prepare_options_is_the_identity() {
        let transporter = RabbitmqTransporter;
        let options = EndpointOptions {
            namespace: Some("ns1".to_owned()),
            max_concurrency: Some(5),
            rabbitmq: None,
        };

        let prepared = transporter.prepare_options(options.clone(), "service1");

        assert_eq!(prepared, options);
    }

    #[tokio::test]
    async fn operations_delegate_to_their_modules() {
        let transporter = RabbitmqTransporter;

        let conn = transporter
            .connect(&EndpointOptions::default(), None, None)
            .await;
        assert_eq!(conn.status, Status::Error);

        let response = transporter.send(None, None).await;
        assert_eq!(
            response.error.as_deref(),
            Some("Cannot send action to queue. No connection")
        );

        transporter.disconnect(Some(conn)).await;
    }
}
