pub mod adapters;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod store;
