#![forbid(unsafe_code)]

pub mod admission;
mod authentication;
pub mod config;
pub mod domain;
pub mod email_client;
pub mod rate_limit;
mod routes;
pub mod startup;
pub mod telemetry;
mod utils;
