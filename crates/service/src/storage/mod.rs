//! Storage abstractions for service layer
//!
//! Generic settings/state persisted under an (entity, namespace, key) triple
//! in whichever relational engine the configuration selects.

pub mod kv_store;

pub use kv_store::{decode_value, KvStore, DEFAULT_NAMESPACE};
