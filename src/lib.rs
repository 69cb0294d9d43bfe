pub mod config;
pub mod humanize;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod outcome;
