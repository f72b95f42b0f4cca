//! Mobile-money gateway integration module
//!
//! Wire-protocol adapter for the provider's push-payment (collection),
//! disbursement, status-query and callback surfaces.

pub mod providers;
pub mod traits;
pub mod types;
