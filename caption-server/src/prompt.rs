use std::path::Path;

use anyhow::Context;
use minijinja::{context, Environment, Template};
use tracing::info;

use crate::caption::{CaptionRequest, Language, Length};

/// Built-in instruction sent alongside the image.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Generate exactly {{ num_captions }} Instagram captions {{ language }}, \
each {{ length }}, in a {{ category }} style for the image. \
After each caption, include only 3 to 5 relevant and trending Instagram hashtags, no more. \
Format: caption first, then hashtags on the next line. No numbering, no title, no explanation.";

/// Compiled instruction template.
///
/// Available variables: `num_captions`, `language`, `length`, `category`.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: Template<'static, 'static>,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self, minijinja::Error> {
        let source = source.into().trim().to_string().into_boxed_str();
        // Compiled once at startup and shared for the process lifetime.
        let env = Box::leak(Box::new(Environment::new()));
        let template = env.template_from_str(Box::leak(source))?;
        Ok(Self { template })
    }

    /// Loads a template override from `path`, or the built-in instruction.
    pub fn load(path: Option<impl AsRef<Path>>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let path = path.as_ref();
                info!("Loading prompt template from: {}", path.display());
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read prompt template {}", path.display()))?;
                Self::new(source).context("invalid prompt template")
            }
            None => Ok(Self::default()),
        }
    }

    pub fn render(&self, request: &CaptionRequest) -> Result<String, minijinja::Error> {
        let ctx = context! {
            num_captions => request.num_captions,
            language => Language::from_tag(&request.language).instruction(),
            length => Length::from_tag(&request.length).instruction(),
            category => request.category,
        };
        self.template.render(ctx)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        // The built-in source is covered by tests and always compiles.
        Self::new(DEFAULT_PROMPT_TEMPLATE).unwrap_or_else(|e| panic!("invalid default prompt: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::InlineImage;

    fn request(num_captions: i64, language: &str, length: &str) -> CaptionRequest {
        CaptionRequest {
            image: InlineImage::new("image/jpeg", b"jpeg"),
            category: "funny".into(),
            num_captions,
            language: language.into(),
            length: length.into(),
        }
    }

    #[test]
    fn test_render_default_prompt() {
        let prompt = PromptTemplate::default()
            .render(&request(3, "english", "medium"))
            .unwrap();
        assert_eq!(
            prompt,
            "Generate exactly 3 Instagram captions in English, each 2–3 sentences long, \
             in a funny style for the image. After each caption, include only 3 to 5 relevant \
             and trending Instagram hashtags, no more. Format: caption first, then hashtags on \
             the next line. No numbering, no title, no explanation."
        );
    }

    #[test]
    fn test_render_language_and_length_phrases() {
        let template = PromptTemplate::default();
        let prompt = template.render(&request(2, "gujarati", "long")).unwrap();
        assert!(prompt.contains("captions in Gujarati,"));
        assert!(prompt.contains("each 3–5 sentences long and storytelling style,"));

        let prompt = template.render(&request(2, "hindi", "short")).unwrap();
        assert!(prompt.contains("captions in Hindi,"));
        assert!(prompt.contains("each 1 sentence long,"));
    }

    #[test]
    fn test_render_unknown_phrases_fall_back() {
        let prompt = PromptTemplate::default()
            .render(&request(5, "klingon", "epic"))
            .unwrap();
        assert!(prompt.starts_with("Generate exactly 5 Instagram captions in English, each 2–3 sentences long,"));
    }

    #[test]
    fn test_custom_template() {
        let template =
            PromptTemplate::new("{{ num_captions }}|{{ language }}|{{ length }}|{{ category }}\n")
                .unwrap();
        let prompt = template.render(&request(20, "hindi", "short")).unwrap();
        assert_eq!(prompt, "20|in Hindi|1 sentence long|funny");
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        assert!(PromptTemplate::new("{% for x in %}").is_err());
    }
}
