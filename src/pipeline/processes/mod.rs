//! Registered processes
//!
//! Registration order is execution order for `all`.

pub mod arb;
pub mod clean_arb_opportunity;
pub mod clean_coin_info;
pub mod sniper;

use super::runner::Process;
use std::sync::Arc;

pub use arb::ArbProcess;
pub use clean_arb_opportunity::CleanArbOpportunityProcess;
pub use clean_coin_info::CleanCoinInfoProcess;
pub use sniper::SniperProcess;

/// Every process in registration order
pub fn default_processes() -> Vec<Arc<dyn Process>> {
    vec![
        Arc::new(CleanCoinInfoProcess),
        Arc::new(CleanArbOpportunityProcess),
        Arc::new(SniperProcess),
        Arc::new(ArbProcess),
    ]
}
