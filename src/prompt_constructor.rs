use crate::color_describer::{parse_descriptions, ColorDescriber};
use crate::form_api::{FormApiError, FormMetadata};
use crate::llm::{ChatRequest, LanguageModel, LlmError, LlmOutcome, PromptModel};
use crate::palette::PaletteSource;
use crate::prompt_reader::{colorless_variant, read_prompts, PromptFileError};
use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const TEMPERATURE: f32 = 0.8;
const MAX_TOKENS: u32 = 200;
const TIMEOUT: Duration = Duration::from_secs(30);

pub const COLOR_PALETTE_TEMPLATE: &str = "color_palette_prompt.txt";

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("form lookup failed: {0}")]
    Form(#[from] FormApiError),

    #[error("{0}")]
    Template(#[from] PromptFileError),

    #[error("prompt generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Timeout")]
    ModelTimeout,
}

/// Which kind of image a prompt is written for. Each kind has its own pair of
/// templates under the prompts directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Background,
    Avatar,
}

impl ImageKind {
    pub const ALL: [ImageKind; 2] = [ImageKind::Background, ImageKind::Avatar];

    pub fn slug(self) -> &'static str {
        match self {
            ImageKind::Background => "background",
            ImageKind::Avatar => "avatar",
        }
    }

    pub fn template(self, prompts_dir: &Path) -> PathBuf {
        prompts_dir.join(format!("{}_img_prompt.txt", self.slug()))
    }

    /// Avatars are cut out by default, backgrounds are kept whole.
    pub fn removes_background_by_default(self) -> bool {
        matches!(self, ImageKind::Avatar)
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Background => write!(f, "background image"),
            ImageKind::Avatar => write!(f, "avatar image"),
        }
    }
}

/// Writes an image prompt from a form's title and, when the form has a logo,
/// the names of the logo's dominant colors.
pub struct PromptConstructor {
    forms: Arc<dyn FormMetadata>,
    palettes: Arc<dyn PaletteSource>,
    describer: ColorDescriber,
    llm: Arc<dyn LanguageModel>,
    prompts_dir: PathBuf,
}

impl PromptConstructor {
    pub fn new(
        forms: Arc<dyn FormMetadata>,
        palettes: Arc<dyn PaletteSource>,
        llm: Arc<dyn LanguageModel>,
        prompts_dir: PathBuf,
    ) -> Self {
        let describer = ColorDescriber::new(llm.clone(), prompts_dir.join(COLOR_PALETTE_TEMPLATE));
        Self {
            forms,
            palettes,
            describer,
            llm,
            prompts_dir,
        }
    }

    pub async fn construct(
        &self,
        kind: ImageKind,
        form_id: u64,
        model: PromptModel,
    ) -> Result<String, PromptError> {
        let heading = self.forms.title(form_id).await?;
        info!("Form {} title: {}", form_id, heading);

        let template = kind.template(&self.prompts_dir);
        let prompts = match self.logo_colors(form_id).await? {
            Some(labels) => {
                let colors_string = labels.join(", ");
                info!("Color descriptions of logo: {}", colors_string);
                read_prompts(
                    &template,
                    &[
                        ("heading", heading.as_str()),
                        ("colors_string", colors_string.as_str()),
                    ],
                )?
            }
            None => read_prompts(colorless_variant(&template), &[("heading", heading.as_str())])?,
        };

        let request = ChatRequest {
            model,
            system_prompt: prompts.system_prompt,
            user_prompt: prompts.user_prompt,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            timeout: TIMEOUT,
        };

        match self.llm.complete(&request).await {
            LlmOutcome::Success(text) => {
                let prompt = text.trim().to_string();
                info!("Generated prompt with {}: {}", model.label(), prompt);
                Ok(prompt)
            }
            LlmOutcome::Timeout => {
                warn!("{} timed out writing the prompt", model.label());
                Err(PromptError::ModelTimeout)
            }
            LlmOutcome::Failed(e) => Err(e.into()),
        }
    }

    /// Color labels for the form's logo, or `None` when the colorless
    /// template should be used instead. Only a broken describer template is
    /// an error; lookup, extraction and model failures fall back.
    async fn logo_colors(&self, form_id: u64) -> Result<Option<Vec<String>>, PromptError> {
        let logo_url = match self.forms.logo_url(form_id).await {
            Ok(Some(url)) => url,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("Could not read properties of form {}: {}", form_id, e);
                return Ok(None);
            }
        };

        let palette = match self.palettes.logo_palette(&logo_url).await {
            Ok(palette) if !palette.is_empty() => palette,
            Ok(_) => {
                warn!("No colors found in logo {}", logo_url);
                return Ok(None);
            }
            Err(e) => {
                warn!("Color extraction failed for {}: {}", logo_url, e);
                return Ok(None);
            }
        };

        match self.describer.describe(&palette).await? {
            LlmOutcome::Success(text) => {
                let labels = parse_descriptions(&text);
                if labels.is_none() {
                    warn!("Unusable color descriptions: {}", text.trim());
                }
                Ok(labels)
            }
            LlmOutcome::Timeout => {
                warn!("Color description timed out");
                Ok(None)
            }
            LlmOutcome::Failed(e) => {
                warn!("Color description failed: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::{Palette, PaletteError, Rgb};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeForm {
        logo: Option<&'static str>,
    }

    #[async_trait]
    impl FormMetadata for FakeForm {
        async fn title(&self, form_id: u64) -> Result<String, FormApiError> {
            if form_id == 404 {
                return Err(FormApiError::NoQuestions(form_id));
            }
            Ok("Summer Camp".into())
        }

        async fn logo_url(&self, _form_id: u64) -> Result<Option<String>, FormApiError> {
            Ok(self.logo.map(str::to_string))
        }
    }

    #[derive(Default)]
    struct CountingPalette {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PaletteSource for CountingPalette {
        async fn logo_palette(&self, _logo_url: &str) -> Result<Palette, PaletteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Palette::new(vec![Rgb(0, 0, 128), Rgb(255, 215, 0)]))
        }
    }

    /// Answers describer requests (max 50 tokens) and prompt requests with
    /// scripted outcomes, recording everything it sees.
    struct ScriptedModel {
        describe: fn() -> LlmOutcome,
        write: fn() -> LlmOutcome,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        fn new(describe: fn() -> LlmOutcome, write: fn() -> LlmOutcome) -> Self {
            Self {
                describe,
                write,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn prompt_requests(&self) -> Vec<ChatRequest> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.max_tokens == MAX_TOKENS)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: &ChatRequest) -> LlmOutcome {
            self.seen.lock().unwrap().push(request.clone());
            if request.max_tokens == MAX_TOKENS {
                (self.write)()
            } else {
                (self.describe)()
            }
        }
    }

    fn described() -> LlmOutcome {
        LlmOutcome::Success(r#"{"1": "Navy", "2": "Gold"}"#.into())
    }

    fn written() -> LlmOutcome {
        LlmOutcome::Success("  A sunny camp banner.\n".into())
    }

    fn prompts_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            (
                "background_img_prompt.txt",
                r#"SYSTEM_PROMPT="""You write prompts."""
USER_PROMPT="""Background for {{ heading }} in {{ colors_string }}""""#,
            ),
            (
                "background_img_prompt_wo_color.txt",
                r#"SYSTEM_PROMPT="""You write prompts."""
USER_PROMPT="""Background for {{ heading }}""""#,
            ),
            (
                "color_palette_prompt.txt",
                r#"SYSTEM_PROMPT="""Name colors."""
USER_PROMPT="""{{ color_count }}: {{ frequent_colors }}""""#,
            ),
        ];
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn constructor(
        dir: &tempfile::TempDir,
        logo: Option<&'static str>,
        palettes: Arc<CountingPalette>,
        llm: Arc<ScriptedModel>,
    ) -> PromptConstructor {
        PromptConstructor::new(
            Arc::new(FakeForm { logo }),
            palettes,
            llm,
            dir.path().to_path_buf(),
        )
    }

    #[test]
    fn test_template_paths() {
        let dir = Path::new("prompts");
        assert_eq!(
            ImageKind::Avatar.template(dir),
            PathBuf::from("prompts/avatar_img_prompt.txt")
        );
        assert_eq!(
            colorless_variant(&ImageKind::Background.template(dir)),
            PathBuf::from("prompts/background_img_prompt_wo_color.txt")
        );
    }

    #[test]
    fn test_bundled_templates_render() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts");
        for kind in ImageKind::ALL {
            let template = kind.template(&dir);
            let with_colors = read_prompts(
                &template,
                &[("heading", "Book Club"), ("colors_string", "Teal, White")],
            )
            .unwrap();
            assert!(with_colors.user_prompt.contains("Teal, White"));
            let plain = read_prompts(colorless_variant(&template), &[("heading", "Book Club")]).unwrap();
            assert!(plain.user_prompt.contains("\"Book Club\""));
        }
        let palette = read_prompts(
            dir.join(COLOR_PALETTE_TEMPLATE),
            &[("frequent_colors", "(1, 2, 3)"), ("color_count", "1")],
        )
        .unwrap();
        assert!(palette.user_prompt.contains(r#"{"1": "Dark Blue""#));
    }

    #[tokio::test]
    async fn test_logo_colors_flow_into_prompt() {
        let dir = prompts_dir();
        let palettes = Arc::new(CountingPalette::default());
        let llm = Arc::new(ScriptedModel::new(described, written));
        let c = constructor(&dir, Some("https://cdn/logo.png"), palettes.clone(), llm.clone());

        let prompt = c
            .construct(ImageKind::Background, 42, PromptModel::Llama3_70b)
            .await
            .unwrap();
        assert_eq!(prompt, "A sunny camp banner.");
        assert_eq!(palettes.calls.load(Ordering::SeqCst), 1);

        let requests = llm.prompt_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_prompt, "Background for Summer Camp in Navy, Gold");
        assert_eq!(requests[0].model, PromptModel::Llama3_70b);
        assert_eq!(requests[0].temperature, 0.8);
        assert_eq!(requests[0].timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_no_logo_uses_colorless_template_without_extraction() {
        let dir = prompts_dir();
        let palettes = Arc::new(CountingPalette::default());
        let llm = Arc::new(ScriptedModel::new(described, written));
        let c = constructor(&dir, None, palettes.clone(), llm.clone());

        c.construct(ImageKind::Background, 42, PromptModel::Gpt35Turbo)
            .await
            .unwrap();
        assert_eq!(palettes.calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.seen.lock().unwrap().len(), 1);
        assert_eq!(llm.prompt_requests()[0].user_prompt, "Background for Summer Camp");
    }

    #[tokio::test]
    async fn test_describer_timeout_falls_back_to_colorless() {
        let dir = prompts_dir();
        let llm = Arc::new(ScriptedModel::new(|| LlmOutcome::Timeout, written));
        let c = constructor(
            &dir,
            Some("https://cdn/logo.png"),
            Arc::new(CountingPalette::default()),
            llm.clone(),
        );

        c.construct(ImageKind::Background, 42, PromptModel::Gpt4)
            .await
            .unwrap();
        assert_eq!(llm.prompt_requests()[0].user_prompt, "Background for Summer Camp");
    }

    #[tokio::test]
    async fn test_model_timeout_is_reported() {
        let dir = prompts_dir();
        let llm = Arc::new(ScriptedModel::new(described, || LlmOutcome::Timeout));
        let c = constructor(&dir, None, Arc::new(CountingPalette::default()), llm);

        let err = c
            .construct(ImageKind::Background, 42, PromptModel::Mixtral8x7b)
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::ModelTimeout));
        assert_eq!(err.to_string(), "Timeout");
    }

    #[tokio::test]
    async fn test_title_failure_propagates() {
        let dir = prompts_dir();
        let llm = Arc::new(ScriptedModel::new(described, written));
        let c = constructor(&dir, None, Arc::new(CountingPalette::default()), llm.clone());

        let err = c
            .construct(ImageKind::Background, 404, PromptModel::Gpt35Turbo)
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Form(FormApiError::NoQuestions(404))));
        assert!(llm.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_is_an_error() {
        let dir = prompts_dir();
        let llm = Arc::new(ScriptedModel::new(described, written));
        let c = constructor(&dir, None, Arc::new(CountingPalette::default()), llm);

        let err = c
            .construct(ImageKind::Avatar, 42, PromptModel::Gpt35Turbo)
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Template(PromptFileError::Io { .. })));
    }
}
