use crate::context::ConversationThread;
use crate::core::params::GenerationParams;
use crate::core::TextGenerator;
use crate::error::BridgeResult;

/// Turns of context handed to the classifier.
const CLASSIFIER_CONTEXT: usize = 2;

/// Asks the text model whether a turn wants a picture.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    params: GenerationParams,
}

impl IntentClassifier {
    pub fn new(base: &GenerationParams, max_new_tokens: u32) -> Self {
        Self {
            params: base.for_classifier(max_new_tokens),
        }
    }

    pub fn prompt(
        template: &str,
        thread: &ConversationThread,
        user_speaker: &str,
        bot_speaker: &str,
        input: &str,
    ) -> String {
        format!(
            "{}\n{}{}: {}\n{}:",
            template,
            thread.tail(CLASSIFIER_CONTEXT).render(),
            user_speaker,
            input,
            bot_speaker
        )
    }

    /// A failed classification counts as "text"; only shutdown is propagated.
    pub async fn is_image_request(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
    ) -> BridgeResult<bool> {
        match generator.generate(prompt, None, &self.params).await {
            Ok(answer) => {
                let is_image = answer.to_lowercase().contains("image");
                tracing::debug!(
                    "[IntentClassifier] Answer {:?} -> image: {}",
                    answer.trim(),
                    is_image
                );
                Ok(is_image)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!("[IntentClassifier] Classification failed, assuming text: {}", e);
                Ok(false)
            }
        }
    }
}
