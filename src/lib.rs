pub mod app;
pub mod audit;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod notify;
pub mod operator;
pub mod reconcile;
pub mod scheduler;
pub mod seed;
pub mod server;
pub mod store;

#[cfg(test)]
mod test_support;
