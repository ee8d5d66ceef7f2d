//! Live collection updates over API Gateway websockets.
//!
//! Clients register subscriptions on `$default`; the stream lambda calls
//! [`broadcast::publish_change`] for every table change.

pub mod broadcast;
pub mod connections;
pub mod handler;
pub mod messages;
