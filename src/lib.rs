//! Typed REST resources over a shared, invalidating query cache.
//!
//! A [`resource::Resource`] exposes `list` and `create` for one collection
//! endpoint. Reads are cached process-wide by endpoint path in a
//! [`cache::QueryClient`], concurrent reads of the same path share one
//! request, and every successful create marks the cached list stale.

pub mod cache;
pub mod communications;
pub mod config;
pub mod http;
pub mod query;
pub mod resource;
