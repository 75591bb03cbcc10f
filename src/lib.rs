// Copyright (c) 2025, The Integreat Authors
// MIT License
// All rights reserved.

pub mod connection;
pub mod consumer;
pub mod errors;
pub mod publisher;
pub mod transporter;
pub mod types;

pub use transporter::{RabbitmqTransporter, Transporter};
