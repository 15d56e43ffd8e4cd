// Market data access: the upstream quote source and the rate limiter that
// guards it.

pub mod rate_limit;
pub mod source;

pub use rate_limit::{Decision, RateLimiter, RateLimiters};
pub use source::{Quote, QuoteError, QuoteSource, YahooQuoteSource};
