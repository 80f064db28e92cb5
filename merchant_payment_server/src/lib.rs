pub mod config;
pub mod data_objects;
pub mod errors;
pub mod exchange;
pub mod helpers;
pub mod instances;
pub mod poll;
pub mod routes;
pub mod server;
pub mod tips;

#[cfg(test)]
mod endpoint_tests;
