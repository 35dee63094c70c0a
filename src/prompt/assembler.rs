use chrono::Local;
use std::collections::HashMap;

use super::classifier::IntentClassifier;
use super::tags::Tags;
use crate::config::{
    BotConfig, DestinationRouting, ImageTemplate, PromptsConfig, RoutingConfig, Settings,
};
use crate::context::{alphanumeric_only, ConversationThread};
use crate::core::params::GenerationParams;
use crate::core::TextGenerator;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::{BotIdentity, InboundTurn};

/// What the turn is asking for.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Text,
    Image(ImageRoute),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRoute {
    pub label: String,
    pub template: ImageTemplate,
}

/// A fully built text backend request.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub intent: Intent,
    /// User input after directive and prefix stripping.
    pub input: String,
    /// Present when the text backend has to run: text replies and written captions.
    pub request: Option<PromptRequest>,
    tags: Tags,
}

impl AssembledPrompt {
    /// Image prompt and negative prompt with `caption` in the `{{prompt}}` slot.
    pub fn image_prompt(&self, caption: &str) -> Option<(String, Option<String>)> {
        let Intent::Image(route) = &self.intent else {
            return None;
        };
        let tags = self.tags.clone().with("prompt", caption);
        Some((
            tags.apply(&route.template.prompt),
            route.template.negative.as_deref().map(|n| tags.apply(n)),
        ))
    }
}

/// Empty directives are treated as disabled.
fn strip_directive<'a>(input: &'a str, directive: &str) -> Option<&'a str> {
    if directive.is_empty() {
        return None;
    }
    input.strip_prefix(directive)
}

pub struct PromptAssembler {
    bot: BotConfig,
    prompts: PromptsConfig,
    routing: RoutingConfig,
    image_templates: HashMap<String, ImageTemplate>,
    base_params: GenerationParams,
    caption_max_new_tokens: u32,
    classifier: IntentClassifier,
}

impl PromptAssembler {
    pub fn new(settings: &Settings) -> Self {
        let base_params = GenerationParams::default()
            .with_overrides(&settings.text_backend.params)
            .with_stopping_strings(settings.text_backend.stopping_strings.clone());

        Self {
            bot: settings.bot.clone(),
            prompts: settings.prompts.clone(),
            routing: settings.routing.clone(),
            image_templates: settings.image_templates.clone(),
            classifier: IntentClassifier::new(
                &base_params,
                settings.text_backend.classifier_max_new_tokens,
            ),
            caption_max_new_tokens: settings.text_backend.caption_max_new_tokens,
            base_params,
        }
    }

    pub fn base_params(&self) -> &GenerationParams {
        &self.base_params
    }

    fn template(&self, name: &str) -> BridgeResult<String> {
        self.prompts
            .template(name)
            .ok_or_else(|| BridgeError::MissingTemplate(format!("template '{}'", name)))
    }

    /// Destination routes shadow the global ones with the same label.
    fn image_route(&self, routing: &DestinationRouting, label: &str) -> BridgeResult<ImageRoute> {
        routing
            .image_templates
            .get(label)
            .or_else(|| self.image_templates.get(label))
            .map(|template| ImageRoute {
                label: label.to_string(),
                template: template.clone(),
            })
            .ok_or_else(|| BridgeError::MissingTemplate(format!("image route '{}'", label)))
    }

    fn match_image_prefix<'a>(&self, input: &'a str) -> Option<(&str, &'a str)> {
        self.routing.image_prefixes.iter().find_map(|route| {
            input
                .strip_prefix(route.prefix.as_str())
                .map(|rest| (route.label.as_str(), rest.trim()))
        })
    }

    pub async fn assemble(
        &self,
        inbound: &InboundTurn,
        identity: &BotIdentity,
        thread: &ConversationThread,
        generator: &dyn TextGenerator,
    ) -> BridgeResult<AssembledPrompt> {
        let routing = self
            .routing
            .for_destination(&inbound.destination)
            .ok_or_else(|| {
                BridgeError::MissingTemplate(format!("destination '{}'", inbound.destination))
            })?;

        let user_speaker = format!("{}{}", self.bot.speaker_prefix, self.bot.user_name_default);
        let bot_speaker = format!("{}{}", self.bot.speaker_prefix, self.bot.name);
        let tags = Tags::new(&self.prompts.tags)
            .with("user", user_speaker.as_str())
            .with("username", alphanumeric_only(&inbound.author_name))
            .with("bot", bot_speaker.as_str())
            .with("date", Local::now().format("%Y-%m-%d %H:%M").to_string());

        let stripped = identity.strip_mentions(&inbound.content);
        let stripped = stripped.trim();

        let (input, intent, raw_mode) =
            if let Some(rest) = strip_directive(stripped, &self.bot.no_template_directive) {
                (rest.trim().to_string(), Intent::Text, true)
            } else {
                let input = stripped.replace('\n', " ");
                if let Some((label, rest)) = self.match_image_prefix(&input) {
                    (rest.to_string(), Intent::Image(self.image_route(routing, label)?), false)
                } else if let Some(rest) = strip_directive(&input, &self.bot.force_text_prefix) {
                    (rest.trim().to_string(), Intent::Text, false)
                } else if routing.classify {
                    let classifier = routing
                        .classifier
                        .as_deref()
                        .unwrap_or(&self.prompts.classifier);
                    let template = tags.apply(&self.template(classifier)?);
                    let prompt = IntentClassifier::prompt(
                        &template,
                        thread,
                        &user_speaker,
                        &bot_speaker,
                        &input,
                    );
                    let intent = if self.classifier.is_image_request(generator, &prompt).await? {
                        Intent::Image(
                            self.image_route(routing, &self.routing.classifier_image_label)?,
                        )
                    } else {
                        Intent::Text
                    };
                    (input, intent, false)
                } else {
                    (input, Intent::Text, false)
                }
            };

        let (template_name, params) = match &intent {
            Intent::Text => (Some(routing.template.as_str()), self.base_params.clone()),
            Intent::Image(route) => (
                route.template.caption_template.as_deref(),
                self.base_params.for_caption(self.caption_max_new_tokens),
            ),
        };
        let needs_text = matches!(intent, Intent::Text) || template_name.is_some();

        let request = if needs_text {
            let preamble = match (raw_mode, template_name) {
                (false, Some(name)) => format!("{}\n", tags.apply(&self.template(name)?)),
                _ => String::new(),
            };
            let negative_prompt = match (raw_mode, routing.negative_template.as_deref()) {
                (false, Some(name)) => Some(tags.apply(&self.template(name)?)),
                _ => None,
            };
            Some(PromptRequest {
                prompt: format!(
                    "{}{}{}: {}\n{}:",
                    preamble,
                    thread.render(),
                    user_speaker,
                    input,
                    bot_speaker
                ),
                negative_prompt,
                params,
            })
        } else {
            None
        };

        tracing::debug!(
            "[PromptAssembler] Turn {} routed as {:?}",
            inbound.id,
            match &intent {
                Intent::Text => "text".to_string(),
                Intent::Image(route) => format!("image:{}", route.label),
            }
        );

        Ok(AssembledPrompt {
            intent,
            input,
            request,
            tags,
        })
    }
}
