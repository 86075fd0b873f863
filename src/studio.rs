use crate::background::{BackgroundError, BackgroundRemover};
use crate::image_logger::{ImageLogger, LogEntry, LogError, LogReceipt};
use crate::llm::PromptModel;
use crate::prompt_constructor::{ImageKind, PromptConstructor, PromptError};
use crate::sd_client::{GenerationRequest, GenerationResult, SdClient, SdError};
use log::info;
use std::sync::Arc;
use thiserror::Error;

pub const LOGGED_MESSAGE: &str = "The image and associated data were successfully logged.";

/// Input problems caught before any request leaves the app. `Display` is the
/// message shown to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid Form ID for {kind}: Form ID must be a positive integer.")]
    InvalidFormId { kind: ImageKind },

    #[error("Either prompt or Form ID must be provided.")]
    MissingInput,

    #[error("No image to log. Please generate an image first.")]
    NoImage,

    #[error("Please provide a rating.")]
    MissingRating,
}

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Prompt(#[from] PromptError),

    #[error("Error generating image: {0}")]
    Generation(#[from] SdError),

    #[error("Error removing background: {0}")]
    Background(#[from] BackgroundError),

    #[error("Error logging image: {0}")]
    Log(#[from] LogError),

    #[error("Logging is not configured. Set the spreadsheet, Drive folder and service account settings.")]
    LoggingDisabled,
}

/// Parses the Form ID field. Blank input means no form; anything else must be
/// a positive integer.
pub fn parse_form_id(kind: ImageKind, text: &str) -> Result<Option<u64>, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    match text.parse::<i64>() {
        Ok(id) if id > 0 => Ok(Some(id as u64)),
        _ => Err(ValidationError::InvalidFormId { kind }),
    }
}

/// The generation and logging steps behind one tab of the UI. Each call is
/// one user interaction.
pub struct Studio {
    prompts: PromptConstructor,
    images: SdClient,
    remover: Arc<dyn BackgroundRemover>,
    logger: Option<ImageLogger>,
}

impl Studio {
    pub fn new(
        prompts: PromptConstructor,
        images: SdClient,
        remover: Arc<dyn BackgroundRemover>,
        logger: Option<ImageLogger>,
    ) -> Self {
        Self {
            prompts,
            images,
            remover,
            logger,
        }
    }

    pub fn logger(&self) -> Option<&ImageLogger> {
        self.logger.as_ref()
    }

    /// A typed prompt wins. Otherwise the prompt is written from the form,
    /// which requires a valid Form ID.
    pub async fn resolve_prompt(
        &self,
        kind: ImageKind,
        form_id_text: &str,
        prompt_text: &str,
        model: PromptModel,
    ) -> Result<String, StudioError> {
        if !prompt_text.trim().is_empty() {
            return Ok(prompt_text.to_string());
        }
        let form_id = parse_form_id(kind, form_id_text)?.ok_or(ValidationError::MissingInput)?;
        info!("Writing {} prompt for form {} with {}", kind, form_id, model.label());
        Ok(self.prompts.construct(kind, form_id, model).await?)
    }

    /// Generates an image and, if asked, cuts out its background. The info
    /// string is the server's, untouched.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        remove_background: bool,
    ) -> Result<GenerationResult, StudioError> {
        let mut result = self.images.txt2img(request).await?;
        if remove_background {
            result.image_bytes = self.remover.remove(result.image_bytes).await?;
            info!("Background removed ({} bytes)", result.image_bytes.len());
        }
        Ok(result)
    }

    pub async fn log(
        &self,
        image: Option<&GenerationResult>,
        rating: Option<f32>,
        user: &str,
        form_id: Option<u64>,
    ) -> Result<LogReceipt, StudioError> {
        let image = image.ok_or(ValidationError::NoImage)?;
        let rating = rating.ok_or(ValidationError::MissingRating)?;
        let logger = self.logger.as_ref().ok_or(StudioError::LoggingDisabled)?;

        let receipt = logger
            .log(LogEntry {
                image_bytes: image.image_bytes.clone(),
                rating,
                info: image.info.clone(),
                user: user.to_string(),
                form_id,
            })
            .await?;
        Ok(receipt)
    }
}

/// Status line shown under the Log button.
pub fn log_status(result: &Result<LogReceipt, StudioError>) -> String {
    match result {
        Ok(_) => LOGGED_MESSAGE.to_string(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_api::{FormApiError, FormMetadata};
    use crate::llm::{ChatRequest, LanguageModel, LlmOutcome};
    use crate::palette::{Palette, PaletteError, PaletteSource};
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls(AtomicUsize);

    impl Calls {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Probe(Arc<Calls>);

    #[async_trait]
    impl FormMetadata for Probe {
        async fn title(&self, _form_id: u64) -> Result<String, FormApiError> {
            self.0.bump();
            Ok("Title".into())
        }

        async fn logo_url(&self, _form_id: u64) -> Result<Option<String>, FormApiError> {
            self.0.bump();
            Ok(None)
        }
    }

    #[async_trait]
    impl PaletteSource for Probe {
        async fn logo_palette(&self, _logo_url: &str) -> Result<Palette, PaletteError> {
            self.0.bump();
            Ok(Palette::new(Vec::new()))
        }
    }

    #[async_trait]
    impl LanguageModel for Probe {
        async fn complete(&self, _request: &ChatRequest) -> LlmOutcome {
            self.0.bump();
            LlmOutcome::Success("written".into())
        }
    }

    struct Cutout;

    #[async_trait]
    impl BackgroundRemover for Cutout {
        async fn remove(&self, _image_bytes: Vec<u8>) -> Result<Vec<u8>, BackgroundError> {
            Ok(b"cutout".to_vec())
        }
    }

    fn studio(calls: &Arc<Calls>, sd_endpoint: String) -> Studio {
        let prompts = PromptConstructor::new(
            Arc::new(Probe(calls.clone())),
            Arc::new(Probe(calls.clone())),
            Arc::new(Probe(calls.clone())),
            "does-not-exist".into(),
        );
        Studio::new(
            prompts,
            SdClient::new(reqwest::Client::new(), sd_endpoint),
            Arc::new(Cutout),
            None,
        )
    }

    #[test]
    fn test_parse_form_id() {
        let kind = ImageKind::Avatar;
        assert_eq!(parse_form_id(kind, " 241 "), Ok(Some(241)));
        assert_eq!(parse_form_id(kind, ""), Ok(None));
        assert_eq!(parse_form_id(kind, "   "), Ok(None));
        for bad in ["0", "-3", "abc", "1.5"] {
            assert_eq!(
                parse_form_id(kind, bad),
                Err(ValidationError::InvalidFormId { kind })
            );
        }
    }

    #[test]
    fn test_invalid_form_id_message() {
        let err = ValidationError::InvalidFormId {
            kind: ImageKind::Background,
        };
        assert_eq!(
            err.to_string(),
            "Invalid Form ID for background image: Form ID must be a positive integer."
        );
    }

    #[tokio::test]
    async fn test_bad_form_id_rejected_before_any_call() {
        let calls = Arc::new(Calls::default());
        let studio = studio(&calls, "http://127.0.0.1:9".into());

        for bad in ["0", "-7"] {
            let err = studio
                .resolve_prompt(ImageKind::Background, bad, "", PromptModel::Gpt35Turbo)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                StudioError::Validation(ValidationError::InvalidFormId { .. })
            ));
        }
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn test_typed_prompt_wins() {
        let calls = Arc::new(Calls::default());
        let studio = studio(&calls, "http://127.0.0.1:9".into());

        let prompt = studio
            .resolve_prompt(ImageKind::Avatar, "0", "a cat astronaut", PromptModel::Gpt4)
            .await
            .unwrap();
        assert_eq!(prompt, "a cat astronaut");
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn test_neither_prompt_nor_form() {
        let calls = Arc::new(Calls::default());
        let studio = studio(&calls, "http://127.0.0.1:9".into());

        let err = studio
            .resolve_prompt(ImageKind::Avatar, "", "  ", PromptModel::Gpt35Turbo)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Either prompt or Form ID must be provided.");
    }

    #[tokio::test]
    async fn test_generate_with_and_without_background_removal() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/sdapi/v1/txt2img")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "images": [STANDARD.encode(b"original")],
                    "info": "{\"seed\": 1}"
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let calls = Arc::new(Calls::default());
        let studio = studio(&calls, server.url());
        let request = GenerationRequest::default();

        let kept = studio.generate(&request, false).await.unwrap();
        assert_eq!(kept.image_bytes, b"original");

        let cut = studio.generate(&request, true).await.unwrap();
        assert_eq!(cut.image_bytes, b"cutout");
        assert_eq!(cut.info, "{\"seed\": 1}");
    }

    #[tokio::test]
    async fn test_log_validation_messages() {
        let calls = Arc::new(Calls::default());
        let studio = studio(&calls, "http://127.0.0.1:9".into());
        let image = GenerationResult {
            image_bytes: b"png".to_vec(),
            info: "{}".into(),
        };

        let no_image = studio.log(None, Some(5.0), "Furkan", None).await;
        assert_eq!(
            log_status(&no_image),
            "No image to log. Please generate an image first."
        );

        let no_rating = studio.log(Some(&image), None, "Furkan", None).await;
        assert_eq!(log_status(&no_rating), "Please provide a rating.");

        let disabled = studio.log(Some(&image), Some(5.0), "Furkan", None).await;
        assert!(matches!(disabled, Err(StudioError::LoggingDisabled)));
    }
}
