//! Activity tracking module

pub mod fsm;
pub mod ignore;
pub mod monitor;
pub mod status;
