//! CNPJ batch lookup service
//!
//! Looks up Simples Nacional / SIMEI enrollment for lists of CNPJs against the
//! rate-limited CNPJá public API. Batches run as background jobs with live
//! progress, cooperative cancellation and a SQLite-backed lookup cache.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
