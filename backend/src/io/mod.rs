//! IO layer: the REST server and the HTTP client of the config endpoints.

pub mod billing_api;
pub mod rest;

pub use billing_api::{BillingApi, BillingApiError, HttpBillingApi};
