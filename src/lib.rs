pub mod agent;
pub mod artifact;
pub mod bus;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod hwinfo;
pub mod identity;
pub mod job;
pub mod ledger;
pub mod shutdown;
pub mod stats;
pub mod status;
pub mod worker;
