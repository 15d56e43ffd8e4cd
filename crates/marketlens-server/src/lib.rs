// MarketLens HTTP API: routes, session gate and CLI support.

pub mod app;
pub mod auth;
pub mod error;
pub mod inspect;
mod routes;
