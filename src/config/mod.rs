//! Configuration module

mod app_config;

pub use app_config::{
    AppConfig, CacheSettings, CoordinatorSettings, LogFormat, LoggingConfig, QueueSettings,
    StorageSettings,
};
