//! # tether-client
//!
//! The seam between the tether agents and the registry / config center.
//!
//! - [`client`] — [`ConfigClient`], [`NamingClient`], [`Connector`] and the
//!   [`Subscription`] handle that cancels a remote watch when dropped
//! - [`http`] — Nacos Open API implementation over `ureq`
//! - `memory` — in-process implementation with inspection hooks, behind the
//!   `memory` feature

pub mod client;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
mod watch;

pub use client::{ChangeListener, ConfigClient, Connector, NamingClient, Subscription};
pub use error::ClientError;
pub use http::{HttpConnector, HttpOptions, NacosHttpClient};
#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryConfigCenter, MemoryConnector, MemoryRegistry};
