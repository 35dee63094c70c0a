use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("tag pattern is valid"));

/// `{{name}}` substitutions for templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    values: HashMap<String, String>,
}

impl Tags {
    pub fn new(extra: &HashMap<String, String>) -> Self {
        Self {
            values: extra.clone(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Single pass: known tags are replaced once, substituted text is not rescanned,
    /// unknown tags are left as written.
    pub fn apply(&self, template: &str) -> String {
        TAG_PATTERN
            .replace_all(template, |caps: &Captures| match self.values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Tags {
        Tags::default()
            .with("user", "User")
            .with("bot", "Fox")
            .with("date", "2026-10-16 09:30")
    }

    #[test]
    fn test_known_tags_replaced() {
        assert_eq!(
            tags().apply("{{bot}} talks to {{user}} on {{date}}. {{user}}?"),
            "Fox talks to User on 2026-10-16 09:30. User?"
        );
    }

    #[test]
    fn test_unknown_tags_pass_through() {
        assert_eq!(
            tags().apply("{{mystery}} {{ user }} {user} {{bot}}"),
            "{{mystery}} {{ user }} {user} Fox"
        );
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let once = tags().apply("Hi {{user}}, I am {{bot}} {{unknown}}");
        assert_eq!(tags().apply(&once), once);
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let tags = Tags::default().with("a", "{{b}}").with("b", "x");
        assert_eq!(tags.apply("{{a}}"), "{{b}}");
    }

    #[test]
    fn test_extra_tags_from_config() {
        let mut extra = HashMap::new();
        extra.insert("style".to_string(), "pirate".to_string());
        assert_eq!(Tags::new(&extra).apply("talk like a {{style}}"), "talk like a pirate");
    }
}
