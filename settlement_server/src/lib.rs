//! # Settlement server
//! This crate hosts the HTTP front end of the settlement engine. It is responsible for:
//! * Listening for webhook deliveries from the payment gateway and checking their signatures.
//! * Converting charge events into the engine's inbound events and handing them to the settlement and refund APIs.
//! * Providing the engine with a real payment gateway client and a notification relay.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhook/gateway`: Gateway event deliveries. `charge.captured`, `charge.succeeded` (once captured) and
//!   `charge.refunded` are processed; everything else is acknowledged.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
