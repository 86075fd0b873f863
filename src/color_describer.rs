use crate::llm::{ChatRequest, LanguageModel, LlmOutcome, PromptModel};
use crate::palette::{Palette, LOGO_COLORS};
use crate::prompt_reader::{read_prompts, PromptFileError};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DESCRIBER_MODEL: PromptModel = PromptModel::Gpt35Turbo;
const TEMPERATURE: f32 = 0.0;
const MAX_TOKENS: u32 = 50;
const TIMEOUT: Duration = Duration::from_secs(30);

/// Asks a language model for short human names of a logo's colors.
pub struct ColorDescriber {
    llm: Arc<dyn LanguageModel>,
    template: PathBuf,
}

impl ColorDescriber {
    pub fn new(llm: Arc<dyn LanguageModel>, template: PathBuf) -> Self {
        Self { llm, template }
    }

    pub fn build_request(&self, palette: &Palette) -> Result<ChatRequest, PromptFileError> {
        let colors = palette.top(LOGO_COLORS);
        let frequent_colors = colors
            .colors()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let color_count = colors.len().to_string();

        let prompts = read_prompts(
            &self.template,
            &[
                ("frequent_colors", frequent_colors.as_str()),
                ("color_count", color_count.as_str()),
            ],
        )?;

        Ok(ChatRequest {
            model: DESCRIBER_MODEL,
            system_prompt: prompts.system_prompt,
            user_prompt: prompts.user_prompt,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            timeout: TIMEOUT,
        })
    }

    /// The success text is expected to be a JSON object of rank to label,
    /// see [`parse_descriptions`].
    pub async fn describe(&self, palette: &Palette) -> Result<LlmOutcome, PromptFileError> {
        let request = self.build_request(palette)?;
        let outcome = self.llm.complete(&request).await;
        if let LlmOutcome::Success(ref text) = outcome {
            info!("Color descriptions of logo: {}", text.trim());
        }
        Ok(outcome)
    }
}

/// Turns `{"1": "Dark Blue", "2": "Orange"}` into labels ordered by rank.
/// Code fences and chatter around the object are tolerated.
pub fn parse_descriptions(text: &str) -> Option<Vec<String>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }

    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&text[start..=end]).ok()?;

    let mut ranked: Vec<(u32, usize, String)> = object
        .into_iter()
        .enumerate()
        .filter_map(|(position, (rank, value))| {
            let label = value.as_str()?.trim().to_string();
            if label.is_empty() {
                return None;
            }
            let rank = rank.trim().parse::<u32>().unwrap_or(u32::MAX);
            Some((rank, position, label))
        })
        .collect();
    ranked.sort();

    let labels: Vec<String> = ranked.into_iter().map(|(_, _, label)| label).collect();
    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Rgb;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl LanguageModel for Recorder {
        async fn complete(&self, request: &ChatRequest) -> LlmOutcome {
            self.seen.lock().unwrap().push(request.clone());
            LlmOutcome::Success(r#"{"1": "Crimson"}"#.into())
        }
    }

    fn template() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"SYSTEM_PROMPT="""Name colors."""
USER_PROMPT="""Describe these {{ color_count }} colors:
{{ frequent_colors }}""""#,
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_describer_receives_at_most_three_colors() {
        let file = template();
        let recorder = Arc::new(Recorder::default());
        let describer = ColorDescriber::new(recorder.clone(), file.path().to_path_buf());

        let palette = Palette::new((0..10).map(|i| Rgb(i * 10, 0, 0)).collect());
        let outcome = describer.describe(&palette).await.unwrap();
        assert!(matches!(outcome, LlmOutcome::Success(_)));

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let request = &seen[0];
        assert_eq!(
            request.user_prompt,
            "Describe these 3 colors:\n(0, 0, 0)\n(10, 0, 0)\n(20, 0, 0)"
        );
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, 50);
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert_eq!(request.model, PromptModel::Gpt35Turbo);
    }

    #[test]
    fn test_parse_descriptions_orders_by_rank() {
        let labels =
            parse_descriptions(r#"{"2": "Orange", "1": "Dark Blue", "3": "Light Blue"}"#).unwrap();
        assert_eq!(labels, vec!["Dark Blue", "Orange", "Light Blue"]);
    }

    #[test]
    fn test_parse_descriptions_tolerates_fences() {
        let text = "Here you go:\n```json\n{\"1\": \"Teal\"}\n```";
        assert_eq!(parse_descriptions(text).unwrap(), vec!["Teal"]);
    }

    #[test]
    fn test_parse_descriptions_rejects_unusable_text() {
        assert_eq!(parse_descriptions("Timeout"), None);
        assert_eq!(parse_descriptions("{}"), None);
        assert_eq!(parse_descriptions(r#"{"1": ""}"#), None);
        assert_eq!(parse_descriptions("} nope {"), None);
    }
}
