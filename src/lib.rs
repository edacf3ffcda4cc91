pub mod auth;
pub mod common;
pub mod server;
pub mod services;
pub mod storage;
pub mod tasks;
pub mod web;

pub use common::{ApiError, ApiResult, Config, PrayerTimings};
pub use server::MinaretServer;
pub use services::{DispatchResult, NotificationService, ServiceContainer, SubscriptionService};
pub use tasks::ScheduledTasks;
