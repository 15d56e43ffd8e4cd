// Shared foundation for the MarketLens workspace: configuration, domain
// types, persistence and the dashboard notification logic.

pub mod chat;
pub mod config;
pub mod db;
pub mod notify;
pub mod watchlist;
