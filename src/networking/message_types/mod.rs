//! Typed params for the built-in methods and for the events the node pushes.

pub mod auth;
pub mod broker_config;
pub mod notifications;

pub const PING_METHOD: &str = "ping";
pub const PONG_METHOD: &str = "pong";
