mod settings;

pub use settings::{
    BotConfig, ControlConfig, DestinationRouting, ImageBackendConfig, ImagePrefix, ImageTemplate,
    LoggingConfig, PromptsConfig, RoutingConfig, Settings, SystemConfig, TextBackendConfig,
};
