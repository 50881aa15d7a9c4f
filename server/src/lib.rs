//! # kvs-server
//!
//! A globally shared key-value store behind an authenticated HTTP API.
//!
//! Callers register an account, exchange their password for a short-lived
//! access token and a longer-lived refresh token, and then list, retrieve or
//! upsert string-valued keys. Records live in a [`kvs::RecordStore`]; the
//! [`service::KeyValueService`] decides what a request may do and how the
//! outcome is reported, and [`http`] maps it onto routes.

pub mod auth;
pub mod config;
mod error;
pub mod http;
pub mod service;

pub use error::{Error, FieldErrors, Result};
