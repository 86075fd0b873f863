use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SD_ENDPOINT: &str = "http://127.0.0.1:7860";

pub const DETAILED_HANDS_TAG: &str = " <lora:detailed_hands:1>";
pub const WHITE_BACKGROUND_TAG: &str = " <lora:white_1_0:1>";
pub const LIGHTNING_4STEP_TAG: &str = " <lora:sdxl_lightning_4step_lora:1>";
pub const LIGHTNING_8STEP_TAG: &str = " <lora:sdxl_lightning_8step_lora:1>";

pub const IMAGE_MODELS: [&str; 9] = [
    "sd_xl_base_1.0",
    "sd_xl_turbo_1.0_fp16",
    "Juggernaut_X_RunDiffusion",
    "Juggernaut_X_RunDiffusion_Hyper",
    "sd3_medium_incl_clips_t5xxlfp16",
    "Juggernaut-XL_v9_RunDiffusionPhoto_v2",
    "sdxl_lightning_4step",
    "sdxl_lightning_8step",
    "Juggernaut_RunDiffusionPhoto2_Lightning_4Steps",
];

pub const SAMPLERS: [&str; 19] = [
    "DPM++ 2M",
    "DPM++ SDE",
    "DPM++ 2M SDE",
    "DPM++ 2M SDE Heun",
    "DPM++ 2S a",
    "DPM++ 3M SDE",
    "Euler a",
    "Euler",
    "LMS",
    "Heun",
    "DPM2",
    "DPM2 a",
    "DPM fast",
    "DPM adaptive",
    "Restart",
    "DDIM",
    "PLMS",
    "UniPC",
    "LCM",
];

pub const SCHEDULERS: [&str; 6] = [
    "Automatic",
    "Uniform",
    "Karras",
    "Exponential",
    "Poly Exponential",
    "SGM Uniform",
];

#[derive(Error, Debug)]
pub enum SdError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation server returned no images")]
    NoImages,

    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("generation info is not valid JSON: {0}")]
    Info(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoraFlags {
    pub detailed_hands: bool,
    pub white_background: bool,
    pub lightning_4step: bool,
    pub lightning_8step: bool,
}

impl LoraFlags {
    /// Appends each enabled adapter tag once; tags already present are skipped.
    pub fn apply(&self, prompt: &str) -> String {
        let mut out = prompt.to_string();
        for (enabled, tag) in [
            (self.detailed_hands, DETAILED_HANDS_TAG),
            (self.white_background, WHITE_BACKGROUND_TAG),
            (self.lightning_4step, LIGHTNING_4STEP_TAG),
            (self.lightning_8step, LIGHTNING_8STEP_TAG),
        ] {
            if enabled && !out.contains(tag.trim_start()) {
                out.push_str(tag);
                info!("Using LoRA{}", tag);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler: String,
    pub scheduler: String,
    pub batch_size: u32,
    pub batch_count: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub lora: LoraFlags,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            model: "sd_xl_turbo_1.0_fp16".to_string(),
            prompt: String::new(),
            negative_prompt: String::new(),
            sampler: "DPM++ 2M".to_string(),
            scheduler: "Karras".to_string(),
            batch_size: 1,
            batch_count: 1,
            steps: 25,
            cfg_scale: 6.0,
            width: 512,
            height: 512,
            seed: -1,
            lora: LoraFlags::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Txt2ImgPayload<'a> {
    prompt: String,
    negative_prompt: &'a str,
    seed: i64,
    sampler_name: &'a str,
    scheduler: &'a str,
    batch_size: u32,
    n_iter: u32,
    steps: u32,
    cfg_scale: f32,
    width: u32,
    height: u32,
    override_settings: OverrideSettings<'a>,
}

#[derive(Debug, Serialize)]
struct OverrideSettings<'a> {
    sd_model_checkpoint: &'a str,
}

impl GenerationRequest {
    fn payload(&self) -> Txt2ImgPayload<'_> {
        Txt2ImgPayload {
            prompt: self.lora.apply(&self.prompt),
            negative_prompt: &self.negative_prompt,
            seed: self.seed,
            sampler_name: &self.sampler,
            scheduler: &self.scheduler,
            batch_size: self.batch_size,
            n_iter: self.batch_count,
            steps: self.steps,
            cfg_scale: self.cfg_scale,
            width: self.width,
            height: self.height,
            override_settings: OverrideSettings {
                sd_model_checkpoint: &self.model,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub image_bytes: Vec<u8>,
    /// Raw info string as returned by the server.
    pub info: String,
}

pub struct SdClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SdClient {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    pub async fn txt2img(&self, request: &GenerationRequest) -> Result<GenerationResult, SdError> {
        let url = format!("{}/sdapi/v1/txt2img", self.endpoint.trim_end_matches('/'));
        let payload = request.payload();
        debug!("Payload: {:?}", payload);

        let response = self.client.post(&url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SdError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Txt2ImgResponse = response.json().await?;
        let first = body.images.first().ok_or(SdError::NoImages)?;
        let image_bytes = STANDARD.decode(strip_data_uri(first))?;
        info!(
            "Generated {} bytes with model {} ({}x{}, {} steps)",
            image_bytes.len(),
            request.model,
            request.width,
            request.height,
            request.steps
        );

        Ok(GenerationResult {
            image_bytes,
            info: body.info,
        })
    }
}

fn strip_data_uri(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded,
    }
}

/// Parsed view of the server's info echo, used when logging.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationInfo {
    fields: serde_json::Map<String, Value>,
}

impl GenerationInfo {
    /// Some server builds leave raw newlines inside string values; those are
    /// escaped and parsing is retried.
    pub fn parse(raw: &str) -> Result<Self, SdError> {
        let fields = match serde_json::from_str(raw) {
            Ok(fields) => fields,
            Err(_) => serde_json::from_str(&escape_newlines_in_strings(raw))?,
        };
        Ok(Self { fields })
    }

    fn text(&self, key: &str) -> String {
        match self.fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn prompt(&self) -> String {
        self.text("prompt")
    }

    pub fn negative_prompt(&self) -> String {
        self.text("negative_prompt")
    }

    pub fn seed(&self) -> String {
        self.text("seed")
    }

    pub fn width(&self) -> String {
        self.text("width")
    }

    pub fn height(&self) -> String {
        self.text("height")
    }

    pub fn sampler_name(&self) -> String {
        self.text("sampler_name")
    }

    pub fn cfg_scale(&self) -> String {
        self.text("cfg_scale")
    }

    pub fn steps(&self) -> String {
        self.text("steps")
    }

    pub fn model_name(&self) -> String {
        self.text("sd_model_name")
    }

    pub fn schedule_type(&self) -> String {
        self.fields
            .get("extra_generation_params")
            .and_then(|extra| extra.get("Schedule type"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn job_timestamp(&self) -> Option<String> {
        let stamp = self.text("job_timestamp");
        (!stamp.is_empty()).then_some(stamp)
    }

    /// Label/value pairs for display.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Prompt", self.prompt()),
            ("Negative prompt", self.negative_prompt()),
            ("Seed", self.seed()),
            ("Size", format!("{}x{}", self.width(), self.height())),
            ("Sampler", self.sampler_name()),
            ("Schedule type", self.schedule_type()),
            ("CFG scale", self.cfg_scale()),
            ("Steps", self.steps()),
            ("Model", self.model_name()),
        ]
    }
}

/// Escapes line breaks that sit inside JSON string literals, leaving the
/// whitespace between tokens alone.
fn escape_newlines_in_strings(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        } else {
            in_string = c == '"';
            out.push(c);
        }
    }
    out
}
