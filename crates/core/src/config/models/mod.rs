pub mod api_observability;
pub mod app_config;
pub mod dispatcher_maintenance;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::{AppConfig, ENV_PREFIX};
pub use dispatcher_maintenance::{
    ClusterLockConfig, DispatcherConfig, MaintenanceConfig, TransportConfig,
};
