pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use types::{PrayerTimings, PRAYER_TIME_RE};
