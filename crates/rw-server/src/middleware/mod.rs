//! HTTP middleware: request ID tagging and loopback-only guarding.

pub mod loopback;
pub mod request_id;
