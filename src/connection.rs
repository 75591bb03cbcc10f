// Copyright (c) 2025, The Integreat Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! This module establishes the broker connection and channel bound to a
//! namespace. Connecting asserts the namespace's topology — a durable direct
//! exchange, a durable queue, and the binding between them — and sets the
//! channel's prefetch to the configured concurrency limit. Failures are
//! captured on the returned [`Connection`] record instead of being raised.

use std::fmt;
use std::sync::Arc;

use lapin::{
    options::{BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    protocol::constants::REPLY_SUCCESS,
    types::{FieldTable, LongString},
    Channel, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, error, warn};

use crate::errors::TransporterError;
use crate::types::{Authentication, EndpointOptions, Status};

/// A broker connection bound to one namespace.
///
/// Created by [`connect`], reused across calls while its status is ok, and
/// passed by reference to send and listen. A record with status ok always
/// carries an open channel; a record with status error never does.
#[derive(Clone)]
pub struct Connection {
    pub status: Status,
    pub namespace: String,
    pub exchange_name: String,
    pub max_concurrency: u16,
    pub channel: Option<Channel>,
    pub connection: Option<Arc<lapin::Connection>>,
    pub error: Option<String>,
}

impl Connection {
    fn open(
        namespace: String,
        exchange_name: String,
        max_concurrency: u16,
        connection: lapin::Connection,
        channel: Channel,
    ) -> Self {
        Connection {
            status: Status::Ok,
            namespace,
            exchange_name,
            max_concurrency,
            channel: Some(channel),
            connection: Some(Arc::new(connection)),
            error: None,
        }
    }

    fn failed(
        namespace: String,
        exchange_name: String,
        max_concurrency: u16,
        err: TransporterError,
    ) -> Self {
        Connection {
            status: Status::Error,
            namespace,
            exchange_name,
            max_concurrency,
            channel: None,
            connection: None,
            error: Some(err.to_string()),
        }
    }

    /// Whether this record holds a usable connection.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// The channel, exchange name, and namespace, when all are usable.
    pub(crate) fn queue_fields(&self) -> Option<(&Channel, &str, &str)> {
        match &self.channel {
            Some(channel) if !self.exchange_name.is_empty() && !self.namespace.is_empty() => {
                Some((channel, self.exchange_name.as_str(), self.namespace.as_str()))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status)
            .field("namespace", &self.namespace)
            .field("exchange_name", &self.exchange_name)
            .field("max_concurrency", &self.max_concurrency)
            .field("channel", &self.channel.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// Establishes or reuses a broker connection for the given endpoint options.
///
/// An existing connection with status ok is returned unchanged; one with
/// status error triggers a fresh attempt. When the options carry no broker
/// parameters, the record is returned with status error before any network
/// attempt is made. The authentication parameter is accepted but unused,
/// reserved for credential injection.
pub async fn connect(
    options: &EndpointOptions,
    _authentication: Option<&Authentication>,
    connection: Option<Connection>,
) -> Connection {
    if let Some(conn) = connection {
        if conn.is_ok() {
            return conn;
        }
    }

    let namespace = options.namespace().to_owned();
    let exchange_name = options.exchange_name();
    let max_concurrency = options.max_concurrency();

    let Some(rabbitmq) = options.rabbitmq.as_ref() else {
        return Connection::failed(
            namespace,
            exchange_name,
            max_concurrency,
            TransporterError::ConfigMissing,
        );
    };

    match open_channel(&rabbitmq.uri(), &namespace, &exchange_name, max_concurrency).await {
        Ok((conn, channel)) => {
            debug!(namespace, exchange = exchange_name, "amqp connected");
            Connection::open(namespace, exchange_name, max_concurrency, conn, channel)
        }
        Err(err) => {
            error!(error = err.to_string(), namespace, "failure to connect");
            Connection::failed(
                namespace,
                exchange_name,
                max_concurrency,
                TransporterError::ConnectFailed(err.to_string()),
            )
        }
    }
}

/// Opens a connection and channel, asserts the namespace topology, and
/// configures the prefetch limit.
async fn open_channel(
    uri: &str,
    namespace: &str,
    exchange_name: &str,
    max_concurrency: u16,
) -> Result<(lapin::Connection, Channel), lapin::Error> {
    debug!("creating amqp connection...");
    let properties =
        ConnectionProperties::default().with_connection_name(LongString::from(namespace));
    let conn = lapin::Connection::connect(uri, properties).await?;

    debug!("creating amqp channel...");
    let channel = conn.create_channel().await?;

    channel
        .exchange_declare(
            exchange_name,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(
            namespace,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            namespace,
            exchange_name,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .basic_qos(max_concurrency, BasicQosOptions::default())
        .await?;

    Ok((conn, channel))
}

/// Closes the channel and connection held by the given record.
///
/// Safe to call with no connection or with a record that never opened one.
/// Close failures are logged and swallowed; the record is consumed either
/// way.
pub async fn disconnect(connection: Option<Connection>) {
    let Some(conn) = connection else {
        return;
    };

    if let Some(channel) = conn.channel {
        if let Err(err) = channel.close(REPLY_SUCCESS, "closing").await {
            warn!(error = err.to_string(), "error closing channel");
        }
    }

    if let Some(connection) = conn.connection {
        if let Err(err) = connection.close(REPLY_SUCCESS, "closing").await {
            warn!(error = err.to_string(), "error closing connection");
        }
    }
}
