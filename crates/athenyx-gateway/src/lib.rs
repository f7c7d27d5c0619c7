//! athenyx-gateway — Authenticated HTTP calls with uniform failure
//! classification and bounded retry. Everything that talks to the research
//! assistant backend goes through [`RequestGateway`].

pub mod gateway;
pub mod retry;

pub use gateway::{GatewayConfig, RequestGateway};
pub use retry::RetryPolicy;
