pub mod bootstrap;
pub mod bot;
pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod settlement;
pub mod validation;
