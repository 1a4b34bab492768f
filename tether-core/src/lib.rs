//! Tether core library — domain types, mapping file loading, errors.
//!
//! - [`types`] — newtypes and domain structs
//! - [`error`] — [`MappingError`]
//! - [`mapping`] — mapping file load and reconcile planning

pub mod error;
pub mod mapping;
pub mod types;

pub use error::MappingError;
pub use mapping::{ConfigMapping, MappingDiff, MappingFile};
pub use types::{
    ConfigKey, DataId, InstanceRegistration, MappingEntry, NacosSettings, ServiceInstance,
    ServiceName, DEFAULT_FILE_MODE, DEFAULT_GROUP, DEFAULT_SERVER_ADDRESSES, DEFAULT_WEIGHT,
};
