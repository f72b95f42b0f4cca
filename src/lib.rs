//! Payment transaction engine for the Wakili legal-practice backend.
//!
//! Collects client payments over mobile money, reconciles asynchronous
//! gateway callbacks against payment records, and drives staff-initiated
//! refunds, with every gateway exchange captured in an append-only ledger.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod notifications;
pub mod orchestrator;
