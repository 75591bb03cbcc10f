// Copyright (c) 2025, The Integreat Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Transporter
//!
//! This module provides the closed set of errors the transporter can report.
//! Every operation returns a structured [`crate::types::Response`] rather than
//! propagating errors to the caller, so the `Display` output of these variants
//! is the exact error text the dispatch framework sees. Only the underlying
//! broker client's errors are caught and wrapped here, at the boundary.

use std::fmt;

use thiserror::Error;

/// Represents the errors a transporter operation can surface.
///
/// The variants cover missing configuration, broker connectivity failures,
/// unmet preconditions on send/listen, invalid actions, and publish or
/// subscribe failures. Variants wrapping a `String` carry the underlying
/// broker client's error message as context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransporterError {
    /// Broker connection options were absent from the endpoint options
    #[error("Connection to RabbitMQ failed: Missing RabbitMQ options")]
    ConfigMissing,

    /// Error establishing a connection, channel, or topology on the broker
    #[error("Connection to RabbitMQ failed: {0}")]
    ConnectFailed(String),

    /// A precondition for sending was not met
    #[error("Cannot send action to queue. {0}")]
    SendPrecondition(Precondition),

    /// A precondition for listening was not met
    #[error("Cannot listen to queue. {0}")]
    ListenPrecondition(Precondition),

    /// The action passed to send was not a structured action
    #[error("No valid action")]
    InvalidAction,

    /// Error publishing a message to the exchange
    #[error("Sending to queue failed. {0}")]
    PublishFailed(String),

    /// Error registering the consumer on the queue
    #[error("Cannot listen to queue. {0}")]
    ConsumeFailed(String),
}

/// The precondition that failed before a send or listen reached the broker.
///
/// These checks run synchronously and never cause network traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No connection record was supplied
    NoConnection,

    /// The connection record lacks a channel, exchange name, or namespace
    MissingQueueFields,

    /// No dispatch handler was supplied to listen
    NoDispatch,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::NoConnection => write!(f, "No connection"),
            Precondition::MissingQueueFields => {
                write!(f, "Missing queue, exchange name, or namespace")
            }
            Precondition::NoDispatch => write!(f, "dispatch is not a function"),
        }
    }
}
