//! Archivist基础设施：仓储实现、事件总线与Analyst HTTP客户端

pub mod analyst_client;
pub mod database;
pub mod event_bus;

pub use analyst_client::HttpAnalystClient;
pub use database::*;
pub use event_bus::{BroadcastEventBus, EventBusConfig};
