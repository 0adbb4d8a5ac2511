//! HTTP control surface and process configuration for the resource scaler

pub mod api;
pub mod config;
