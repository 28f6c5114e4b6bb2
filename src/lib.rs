#[macro_use]
extern crate tracing;

pub mod app_config;
pub mod children;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod requirements;
pub mod status;
pub mod store;
pub mod sync;
pub mod webhook;
