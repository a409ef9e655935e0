pub mod app_identity;
pub mod loader;
pub mod schema;
pub mod store;

pub use loader::{default_config_path, load_config, load_default_config, save_config};
pub use schema::{
    ActionQueueConfig, AppConfig, GuardConfig, HitlConfig, IdentityConfig, MemoryConfig,
    MessageBusConfig, NotificationsConfig, ProviderConfig, SchedulerConfig, SecurityConfig,
    SkillsConfig,
};
pub use store::ConfigStore;
