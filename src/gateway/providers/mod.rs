//! Gateway adapter implementations
//!
//! Concrete implementations of the PaymentGateway trait.

pub mod daraja;

pub use daraja::DarajaGateway;
