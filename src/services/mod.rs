pub mod audit;
pub mod ledger;
pub mod waitlist;
pub mod allocation;
pub mod payment;
