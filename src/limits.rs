pub use self::cost::{ChargeReceipt, CostError, CostMonitor};
pub use self::rate::{RateLimiter, RateWindow};

pub mod cost;
pub mod rate;
