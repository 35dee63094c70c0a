use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::core::params::GenerationOverrides;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bot: BotConfig,
    pub text_backend: TextBackendConfig,
    pub image_backend: ImageBackendConfig,
    pub prompts: PromptsConfig,
    pub routing: RoutingConfig,
    pub image_templates: HashMap<String, ImageTemplate>,
    pub control: ControlConfig,
    pub system: SystemConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Name the bot speaks as inside prompts.
    pub name: String,
    /// Prepended to every speaker label in a prompt.
    pub speaker_prefix: String,
    pub user_name_default: String,
    pub max_chain_depth: usize,
    pub no_template_directive: String,
    pub force_text_prefix: String,
    pub max_reply_chars: usize,
    /// Appended to the caption while an image is being generated.
    pub image_pending_message: String,
    pub image_failure_message: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Bot".to_string(),
            speaker_prefix: String::new(),
            user_name_default: "User".to_string(),
            max_chain_depth: 50,
            no_template_directive: "[nopreprompt]".to_string(),
            force_text_prefix: "[text]".to_string(),
            max_reply_chars: 1900,
            image_pending_message: "(generating...)".to_string(),
            image_failure_message: "Failed to generate an image.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextBackendConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Sleep between checks of the unload flag.
    pub unload_poll_ms: u64,
    pub stopping_strings: Vec<String>,
    pub params: GenerationOverrides,
    pub classifier_max_new_tokens: u32,
    pub caption_max_new_tokens: u32,
    /// Extra request fields forwarded verbatim.
    pub passthrough: HashMap<String, serde_json::Value>,
}

impl Default for TextBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 300_000,
            unload_poll_ms: 1000,
            stopping_strings: Vec::new(),
            params: GenerationOverrides::default(),
            classifier_max_new_tokens: 10,
            caption_max_new_tokens: 200,
            passthrough: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBackendConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub images: u32,
    pub passthrough: HashMap<String, serde_json::Value>,
}

impl Default for ImageBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:7801".to_string(),
            timeout_ms: 600_000,
            images: 1,
            passthrough: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Named templates, one entry per line.
    pub templates: HashMap<String, Vec<String>>,
    /// Template used for the image-vs-text judgement call.
    pub classifier: String,
    /// Extra `{{tag}}` substitutions applied to every template.
    pub tags: HashMap<String, String>,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
            classifier: "classifier".to_string(),
            tags: HashMap::new(),
        }
    }
}

impl PromptsConfig {
    pub fn template(&self, name: &str) -> Option<String> {
        self.templates.get(name).map(|lines| lines.join("\n"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default: Option<DestinationRouting>,
    pub destinations: HashMap<String, DestinationRouting>,
    /// Checked in order; first matching prefix wins.
    pub image_prefixes: Vec<ImagePrefix>,
    /// Image template used when the classifier decides a turn is an image request.
    pub classifier_image_label: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default: None,
            destinations: HashMap::new(),
            image_prefixes: vec![ImagePrefix {
                prefix: "[image]".to_string(),
                label: "image".to_string(),
            }],
            classifier_image_label: "image".to_string(),
        }
    }
}

impl RoutingConfig {
    /// Destination-specific routing, then the `*` wildcard, then the default.
    pub fn for_destination(&self, destination: &str) -> Option<&DestinationRouting> {
        self.destinations
            .get(destination)
            .or_else(|| self.destinations.get("*"))
            .or(self.default.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationRouting {
    pub template: String,
    #[serde(default)]
    pub negative_template: Option<String>,
    #[serde(default)]
    pub classify: bool,
    /// Overrides the classifier template for this destination.
    #[serde(default)]
    pub classifier: Option<String>,
    /// Image routes checked before the global `image_templates`.
    #[serde(default)]
    pub image_templates: HashMap<String, ImageTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePrefix {
    pub prefix: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTemplate {
    /// Image prompt; `{{prompt}}` receives the caption.
    pub prompt: String,
    #[serde(default)]
    pub negative: Option<String>,
    /// When set, the caption is written by the text backend using this named template.
    #[serde(default)]
    pub caption_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:7805".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub channel_buffer_size: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("BRIDGE").separator("__"))
            .build()?;

        config.try_deserialize::<Settings>().map(Settings::normalized)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("BRIDGE").separator("__"))
            .build()?;

        config.try_deserialize::<Settings>().map(Settings::normalized)
    }

    fn normalized(mut self) -> Self {
        self.text_backend.stopping_strings = self
            .text_backend
            .stopping_strings
            .iter()
            .map(|s| s.replace("\\n", "\n"))
            .collect();
        self
    }
}
