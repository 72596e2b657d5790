//! mailwarm library entrypoint.
//!
//! Modules:
//! - `config`: environment-driven configuration
//! - `crypto`: at-rest encryption for mailbox credentials
//! - `db`: migrations, pool setup and typed queries
//! - `models`: typed records used across layers
//! - `mail`: SMTP send and IMAP mailbox subscriptions
//! - `services`: text generator, warm-up orchestrator, control facade
//! - `routes`: axum router and handlers

pub mod config;
pub mod crypto;
pub mod db;
pub mod mail;
pub mod models;
pub mod routes;
pub mod services;
