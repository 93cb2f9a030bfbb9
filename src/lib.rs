pub mod app;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod notify;
pub mod resolver;
pub mod state;
pub mod storage;

pub use app::{DailySession, HomeView};
pub use catalog::{Catalog, Message, MessageDate};
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use resolver::NotificationThreshold;
