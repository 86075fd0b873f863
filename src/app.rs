use crate::background::{BackgroundRemover, CornerKeyRemover, RembgService};
use crate::config::{masked, AppConfig, USERS};
use crate::drive::{DriveClient, DRIVE_UPLOAD_BASE};
use crate::form_api::FormClient;
use crate::google_auth::{ServiceAccountAuth, TokenProvider};
use crate::image_logger::ImageLogger;
use crate::llm::{ChatClient, LlmRouter, PromptModel, Provider};
use crate::palette::ColorExtractor;
use crate::prompt_constructor::{ImageKind, PromptConstructor};
use crate::sd_client::{
    GenerationInfo, GenerationRequest, GenerationResult, LoraFlags, SdClient, IMAGE_MODELS,
    SAMPLERS, SCHEDULERS,
};
use crate::sheets::{SheetsClient, SHEETS_API_BASE};
use crate::studio::{log_status, parse_form_id, Studio};
use crate::ui_theme::{StatusKind, StudioTheme};
use eframe::egui;
use egui_extras::{Column, TableBuilder};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

const MAX_LOGS: usize = 1000;
const PREVIEW_SIZE: f32 = 384.0;
const DEFAULT_RATING: f32 = 5.0;

const FORM_ID_PLACEHOLDER: &str = "e.g. 241618305128047";
const PROMPT_PLACEHOLDER: &str = "Leave empty to write one from the form";
const NEGATIVE_PROMPT_PLACEHOLDER: &str = "Negative prompt";

/// Messages from background tasks to the UI thread.
enum AppEvent {
    Log(String),
    PromptReady {
        kind: ImageKind,
        prompt: String,
    },
    Generated {
        kind: ImageKind,
        result: GenerationResult,
        preview: Option<egui::ColorImage>,
    },
    Failed {
        kind: ImageKind,
        message: String,
    },
    Logged {
        kind: ImageKind,
        status: String,
        ok: bool,
    },
}

/// Inputs and outputs of one generation tab.
struct TabForm {
    kind: ImageKind,

    form_id: String,
    prompt: String,
    negative_prompt: String,
    prompt_model: PromptModel,
    image_model: String,
    width: u32,
    height: u32,
    sampler: String,
    scheduler: String,
    cfg_scale: f32,
    steps: u32,
    batch_count: u32,
    batch_size: u32,
    seed: i64,
    lora: LoraFlags,
    remove_background: bool,

    generated_prompt: String,
    result: Option<GenerationResult>,
    texture: Option<egui::TextureHandle>,
    info_rows: Vec<(&'static str, String)>,
    rating: f32,
    status: Option<(StatusKind, String)>,
    log_status: Option<(StatusKind, String)>,
    generating: bool,
    logging: bool,
}

impl TabForm {
    fn new(kind: ImageKind) -> Self {
        let defaults = GenerationRequest::default();
        Self {
            kind,
            form_id: String::new(),
            prompt: String::new(),
            negative_prompt: String::new(),
            prompt_model: PromptModel::default(),
            image_model: defaults.model,
            width: defaults.width,
            height: defaults.height,
            sampler: defaults.sampler,
            scheduler: defaults.scheduler,
            // Turbo checkpoints want a single step without guidance.
            cfg_scale: 1.0,
            steps: 1,
            batch_count: defaults.batch_count,
            batch_size: defaults.batch_size,
            seed: defaults.seed,
            lora: defaults.lora,
            remove_background: kind.removes_background_by_default(),
            generated_prompt: String::new(),
            result: None,
            texture: None,
            info_rows: Vec::new(),
            rating: DEFAULT_RATING,
            status: None,
            log_status: None,
            generating: false,
            logging: false,
        }
    }

    /// The slider always shows a value, and that value is what gets logged.
    fn rating_for_log(&self) -> Option<f32> {
        Some(self.rating)
    }

    fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            model: self.image_model.clone(),
            prompt,
            negative_prompt: self.negative_prompt.clone(),
            sampler: self.sampler.clone(),
            scheduler: self.scheduler.clone(),
            batch_size: self.batch_size,
            batch_count: self.batch_count,
            steps: self.steps,
            cfg_scale: self.cfg_scale,
            width: self.width,
            height: self.height,
            seed: self.seed,
            lora: self.lora,
        }
    }
}

enum TabAction {
    Generate,
    Log,
    SaveImage,
}

pub struct StudioApp {
    config: AppConfig,
    config_path: PathBuf,
    studio: Arc<Studio>,
    logging_enabled: bool,

    selected: ImageKind,
    background: TabForm,
    avatar: TabForm,

    logs: Vec<String>,
    new_logs_count: usize,

    runtime: tokio::runtime::Runtime,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,

    theme: StudioTheme,
}

impl StudioApp {
    pub fn new(runtime: tokio::runtime::Runtime, config: AppConfig, config_path: PathBuf) -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel::<AppEvent>();
        let mut logs = Vec::new();

        let (studio, notes) = build_studio(&config);
        let logging_enabled = studio.logger().is_some();
        logs.extend(notes);
        logs.push(format!(
            "Image server: {} | Form API key: {} | OpenAI key: {} | Groq key: {}",
            config.sd_endpoint,
            masked(&config.jotform_api_key),
            masked(&config.openai_api_key),
            masked(&config.groq_api_key)
        ));

        Self {
            config,
            config_path,
            studio: Arc::new(studio),
            logging_enabled,
            selected: ImageKind::Background,
            background: TabForm::new(ImageKind::Background),
            avatar: TabForm::new(ImageKind::Avatar),
            logs,
            new_logs_count: 0,
            runtime,
            event_sender,
            event_receiver,
            theme: StudioTheme::default(),
        }
    }

    fn tab_mut(&mut self, kind: ImageKind) -> &mut TabForm {
        match kind {
            ImageKind::Background => &mut self.background,
            ImageKind::Avatar => &mut self.avatar,
        }
    }

    fn save_user(&self) {
        if let Err(e) = AppConfig::persist_user(&self.config_path, &self.config.user) {
            error!("Failed to save config: {}", e);
        }
    }

    fn start_generation(&mut self, ctx: &egui::Context, kind: ImageKind) {
        let studio = self.studio.clone();
        let sender = self.event_sender.clone();
        let ctx = ctx.clone();

        let tab = self.tab_mut(kind);
        if tab.generating {
            return;
        }
        tab.generating = true;
        tab.status = Some((StatusKind::Info, "Generating...".to_string()));
        tab.log_status = None;

        let form_id_text = tab.form_id.clone();
        let prompt_text = tab.prompt.clone();
        let model = tab.prompt_model;
        let remove_background = tab.remove_background;
        let template = tab.request(String::new());

        self.runtime.spawn(async move {
            let event = match studio
                .resolve_prompt(kind, &form_id_text, &prompt_text, model)
                .await
            {
                Err(e) => AppEvent::Failed {
                    kind,
                    message: e.to_string(),
                },
                Ok(prompt) => {
                    let _ = sender.send(AppEvent::PromptReady {
                        kind,
                        prompt: prompt.clone(),
                    });
                    ctx.request_repaint();

                    let request = GenerationRequest { prompt, ..template };
                    match studio.generate(&request, remove_background).await {
                        Ok(result) => {
                            let preview = decode_preview(&result.image_bytes);
                            AppEvent::Generated {
                                kind,
                                result,
                                preview,
                            }
                        }
                        Err(e) => AppEvent::Failed {
                            kind,
                            message: e.to_string(),
                        },
                    }
                }
            };
            let _ = sender.send(event);
            ctx.request_repaint();
        });
    }

    fn start_logging(&mut self, ctx: &egui::Context, kind: ImageKind) {
        let studio = self.studio.clone();
        let sender = self.event_sender.clone();
        let ctx = ctx.clone();
        let user = self.config.user.clone();

        let tab = self.tab_mut(kind);
        if tab.logging {
            return;
        }
        tab.logging = true;
        tab.log_status = Some((StatusKind::Info, "Logging...".to_string()));

        let image = tab.result.clone();
        let rating = tab.rating_for_log();
        let form_id = parse_form_id(kind, &tab.form_id).ok().flatten();

        self.runtime.spawn(async move {
            let result = studio.log(image.as_ref(), rating, &user, form_id).await;
            if let Ok(receipt) = &result {
                let _ = sender.send(AppEvent::Log(format!(
                    "Logged {} as row {} (file {})",
                    receipt.image_name,
                    receipt
                        .row
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    receipt.file_id
                )));
            }
            let _ = sender.send(AppEvent::Logged {
                kind,
                ok: result.is_ok(),
                status: log_status(&result),
            });
            ctx.request_repaint();
        });
    }

    fn save_image(&mut self, kind: ImageKind) {
        let tab = self.tab_mut(kind);
        let Some(result) = tab.result.as_ref() else {
            return;
        };
        let file_name = GenerationInfo::parse(&result.info)
            .ok()
            .and_then(|info| info.job_timestamp())
            .unwrap_or_else(|| format!("{}_image", kind.slug()));

        let Some(path) = rfd::FileDialog::new()
            .set_file_name(format!("{}.png", file_name))
            .add_filter("PNG image", &["png"])
            .save_file()
        else {
            return;
        };

        let message = match std::fs::write(&path, &result.image_bytes) {
            Ok(()) => format!("Saved image to {}", path.display()),
            Err(e) => format!("Failed to save image: {}", e),
        };
        self.push_log(message);
    }

    fn open_spreadsheet(&mut self) {
        let Some(logger) = self.studio.logger() else {
            self.push_log("Logging is not configured".to_string());
            return;
        };
        let url = logger.spreadsheet_url();
        match webbrowser::open(&url) {
            Ok(_) => self.push_log(format!("Opening log spreadsheet in browser: {}", url)),
            Err(e) => self.push_log(format!("Failed to open browser: {}", e)),
        }
    }

    fn push_log(&mut self, message: String) {
        info!("{}", message);
        self.logs.push(message);
        self.new_logs_count += 1;
    }

    fn drain_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                AppEvent::Log(message) => self.push_log(message),
                AppEvent::PromptReady { kind, prompt } => {
                    self.tab_mut(kind).generated_prompt = prompt;
                }
                AppEvent::Generated {
                    kind,
                    result,
                    preview,
                } => {
                    let info_rows = match GenerationInfo::parse(&result.info) {
                        Ok(info) => info.summary(),
                        Err(e) => {
                            warn!("Could not parse generation info: {}", e);
                            vec![("Info", result.info.clone())]
                        }
                    };
                    let texture = preview.map(|image| {
                        ctx.load_texture(
                            format!("{}-preview", kind.slug()),
                            image,
                            egui::TextureOptions::LINEAR,
                        )
                    });
                    let size = result.image_bytes.len();

                    let tab = self.tab_mut(kind);
                    tab.generating = false;
                    tab.result = Some(result);
                    tab.texture = texture;
                    tab.info_rows = info_rows;
                    tab.status = Some((StatusKind::Success, "Image generated.".to_string()));
                    self.push_log(format!("Generated {} ({} bytes)", kind, size));
                }
                AppEvent::Failed { kind, message } => {
                    let tab = self.tab_mut(kind);
                    tab.generating = false;
                    tab.status = Some((StatusKind::Error, message.clone()));
                    self.push_log(format!("{} failed: {}", kind, message));
                }
                AppEvent::Logged { kind, status, ok } => {
                    let tab = self.tab_mut(kind);
                    tab.logging = false;
                    let severity = if ok {
                        StatusKind::Success
                    } else {
                        StatusKind::Warning
                    };
                    tab.log_status = Some((severity, status));
                }
            }
        }

        if self.logs.len() > MAX_LOGS {
            let remove_count = self.logs.len() - MAX_LOGS;
            self.logs.drain(0..remove_count);
        }
    }
}

impl eframe::App for StudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.theme.apply_to_ctx(ctx);
        self.drain_events(ctx);

        egui::TopBottomPanel::bottom("activity_log")
            .resizable(true)
            .default_height(140.0)
            .show(ctx, |ui| self.show_logs_panel(ui));

        let mut action = None;
        let mut user_changed = false;
        let mut open_sheet = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(self.theme.spacing_medium);
            ui.horizontal(|ui| {
                for kind in ImageKind::ALL {
                    let title = match kind {
                        ImageKind::Background => "Background Generation",
                        ImageKind::Avatar => "Avatar Generation",
                    };
                    ui.selectable_value(
                        &mut self.selected,
                        kind,
                        egui::RichText::new(title).size(15.0),
                    );
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let button = ui.add_enabled(
                        self.logging_enabled,
                        egui::Button::new("Open Log Sheet").rounding(self.theme.radius_medium),
                    );
                    if button.clicked() {
                        open_sheet = true;
                    }
                    egui::ComboBox::from_id_salt("user")
                        .selected_text(self.config.user.as_str())
                        .show_ui(ui, |ui| {
                            for user in USERS {
                                if ui
                                    .selectable_value(&mut self.config.user, user.to_string(), user)
                                    .changed()
                                {
                                    user_changed = true;
                                }
                            }
                        });
                    ui.label(self.theme.field_label("User"));
                });
            });
            ui.add_space(self.theme.spacing_medium);

            let theme = &self.theme;
            let logging_enabled = self.logging_enabled;
            let tab = match self.selected {
                ImageKind::Background => &mut self.background,
                ImageKind::Avatar => &mut self.avatar,
            };
            egui::ScrollArea::vertical()
                .id_salt(format!("{}_scroll", tab.kind.slug()))
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    action = show_tab(ui, theme, tab, logging_enabled);
                });
        });

        if open_sheet {
            self.open_spreadsheet();
        }
        if user_changed {
            self.save_user();
            let user = self.config.user.clone();
            self.push_log(format!("User set to {}", user));
        }
        let kind = self.selected;
        match action {
            Some(TabAction::Generate) => self.start_generation(ctx, kind),
            Some(TabAction::Log) => self.start_logging(ctx, kind),
            Some(TabAction::SaveImage) => self.save_image(kind),
            None => {}
        }
    }
}

impl StudioApp {
    fn show_logs_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(self.theme.spacing_small);
        ui.horizontal(|ui| {
            ui.label(self.theme.section_title("Activity"));
            if self.new_logs_count > 0 {
                ui.label(
                    egui::RichText::new(format!("{} new", self.new_logs_count))
                        .size(12.0)
                        .color(self.theme.accent),
                );
            }
        });
        ui.add_space(self.theme.spacing_small);

        egui::ScrollArea::vertical()
            .id_salt("logs_scroll")
            .stick_to_bottom(true)
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                if self.logs.is_empty() {
                    ui.label(
                        egui::RichText::new("No activity yet")
                            .size(13.0)
                            .color(self.theme.text_muted),
                    );
                }
                for (i, line) in self.logs.iter().enumerate() {
                    ui.horizontal_wrapped(|ui| {
                        ui.label(
                            egui::RichText::new(format!("{:>3}", i + 1))
                                .size(10.0)
                                .color(self.theme.text_muted),
                        );
                        ui.add_space(self.theme.spacing_small);
                        ui.label(
                            egui::RichText::new(line)
                                .size(12.0)
                                .color(self.theme.text_secondary),
                        );
                    });
                }
            });
        self.new_logs_count = 0;
    }
}

fn show_tab(
    ui: &mut egui::Ui,
    theme: &StudioTheme,
    tab: &mut TabForm,
    logging_enabled: bool,
) -> Option<TabAction> {
    let mut action = None;
    let id = tab.kind.slug();

    theme.card_frame().show(ui, |ui| {
        ui.label(theme.section_title("Prompt"));
        ui.add_space(theme.spacing_small);
        egui::Grid::new(format!("{}_prompt_grid", id))
            .num_columns(2)
            .spacing([theme.spacing_large, theme.spacing_medium])
            .show(ui, |ui| {
                ui.label(theme.field_label("Form ID"));
                ui.add(
                    egui::TextEdit::singleline(&mut tab.form_id)
                        .desired_width(220.0)
                        .hint_text(FORM_ID_PLACEHOLDER),
                );
                ui.end_row();

                ui.label(theme.field_label("Prompt"));
                ui.add(
                    egui::TextEdit::multiline(&mut tab.prompt)
                        .desired_rows(2)
                        .desired_width(f32::INFINITY)
                        .hint_text(PROMPT_PLACEHOLDER),
                );
                ui.end_row();

                ui.label(theme.field_label("Negative prompt"));
                ui.add(
                    egui::TextEdit::multiline(&mut tab.negative_prompt)
                        .desired_rows(2)
                        .desired_width(f32::INFINITY)
                        .hint_text(NEGATIVE_PROMPT_PLACEHOLDER),
                );
                ui.end_row();

                ui.label(theme.field_label("Prompt Model"));
                egui::ComboBox::from_id_salt(format!("{}_prompt_model", id))
                    .selected_text(tab.prompt_model.label())
                    .show_ui(ui, |ui| {
                        for model in PromptModel::ALL {
                            ui.selectable_value(&mut tab.prompt_model, model, model.label());
                        }
                    });
                ui.end_row();

                ui.label(theme.field_label("Image Model"));
                combo(ui, format!("{}_image_model", id), &mut tab.image_model, &IMAGE_MODELS);
                ui.end_row();
            });
    });
    ui.add_space(theme.spacing_medium);

    theme.card_frame().show(ui, |ui| {
        ui.label(theme.section_title("Parameters"));
        ui.add_space(theme.spacing_small);
        egui::Grid::new(format!("{}_param_grid", id))
            .num_columns(4)
            .spacing([theme.spacing_large, theme.spacing_medium])
            .show(ui, |ui| {
                ui.label(theme.field_label("Width"));
                ui.add(egui::Slider::new(&mut tab.width, 64..=2048).step_by(16.0));
                ui.label(theme.field_label("Height"));
                ui.add(egui::Slider::new(&mut tab.height, 64..=2048).step_by(16.0));
                ui.end_row();

                ui.label(theme.field_label("Sampling method"));
                combo(ui, format!("{}_sampler", id), &mut tab.sampler, &SAMPLERS);
                ui.label(theme.field_label("Schedule type"));
                combo(ui, format!("{}_scheduler", id), &mut tab.scheduler, &SCHEDULERS);
                ui.end_row();

                ui.label(theme.field_label("CFG Scale"));
                ui.add(egui::Slider::new(&mut tab.cfg_scale, 1.0..=30.0).step_by(0.5));
                ui.label(theme.field_label("Sampling steps"));
                ui.add(egui::Slider::new(&mut tab.steps, 1..=150));
                ui.end_row();

                ui.label(theme.field_label("Batch count"));
                ui.add(egui::Slider::new(&mut tab.batch_count, 1..=100));
                ui.label(theme.field_label("Batch size"));
                ui.add(egui::Slider::new(&mut tab.batch_size, 1..=8));
                ui.end_row();

                ui.label(theme.field_label("Seed"));
                ui.horizontal(|ui| {
                    ui.add(egui::DragValue::new(&mut tab.seed).speed(1.0));
                    if ui.small_button("🎲").on_hover_text("Random seed").clicked() {
                        tab.seed = -1;
                    }
                });
                if tab.seed < -1 {
                    tab.seed = -1;
                }
                ui.end_row();
            });

        ui.add_space(theme.spacing_small);
        ui.horizontal_wrapped(|ui| {
            ui.checkbox(&mut tab.lora.detailed_hands, "Detailed hands LoRA");
            ui.checkbox(&mut tab.lora.white_background, "White background LoRA");
            ui.checkbox(&mut tab.lora.lightning_4step, "SDXL-Lightning 4-step LoRA");
            ui.checkbox(&mut tab.lora.lightning_8step, "SDXL-Lightning 8-step LoRA");
        });
        ui.checkbox(&mut tab.remove_background, "Remove background");
    });
    ui.add_space(theme.spacing_medium);

    ui.horizontal(|ui| {
        let label = if tab.generating { "Generating..." } else { "Generate" };
        let button = egui::Button::new(egui::RichText::new(label).size(15.0).strong())
            .fill(theme.accent)
            .rounding(theme.radius_medium)
            .min_size(egui::vec2(140.0, 32.0));
        if ui.add_enabled(!tab.generating, button).clicked() {
            action = Some(TabAction::Generate);
        }
        if tab.generating {
            ui.spinner();
        }
        if let Some((kind, message)) = &tab.status {
            ui.label(egui::RichText::new(message).color(theme.status_color(*kind)));
        }
    });
    ui.add_space(theme.spacing_medium);

    if !tab.generated_prompt.is_empty() {
        theme.card_frame().show(ui, |ui| {
            ui.label(theme.field_label("Generated Prompt"));
            ui.add(
                egui::TextEdit::multiline(&mut tab.generated_prompt.as_str())
                    .desired_rows(3)
                    .desired_width(f32::INFINITY),
            );
        });
        ui.add_space(theme.spacing_medium);
    }

    if tab.result.is_some() {
        theme.card_frame().show(ui, |ui| {
            ui.horizontal_top(|ui| {
                if let Some(texture) = &tab.texture {
                    egui::Frame::none()
                        .rounding(theme.radius_small)
                        .show(ui, |ui| {
                            ui.add(
                                egui::Image::new(texture)
                                    .max_size(egui::vec2(PREVIEW_SIZE, PREVIEW_SIZE))
                                    .rounding(theme.radius_small),
                            );
                        });
                }
                ui.add_space(theme.spacing_large);
                ui.vertical(|ui| {
                    TableBuilder::new(ui)
                        .striped(true)
                        .column(Column::auto().at_least(110.0))
                        .column(Column::remainder())
                        .body(|mut body| {
                            for (label, value) in &tab.info_rows {
                                body.row(20.0, |mut row| {
                                    row.col(|ui| {
                                        ui.label(theme.field_label(label));
                                    });
                                    row.col(|ui| {
                                        ui.label(value);
                                    });
                                });
                            }
                        });
                });
            });

            ui.add_space(theme.spacing_medium);
            ui.horizontal(|ui| {
                ui.label(theme.field_label("Rating"));
                ui.add(egui::Slider::new(&mut tab.rating, 1.0..=10.0).step_by(0.5));
                ui.add_space(theme.spacing_large);

                let log_button = ui.add_enabled(
                    logging_enabled && !tab.logging,
                    egui::Button::new("Log").rounding(theme.radius_medium),
                );
                if log_button.clicked() {
                    action = Some(TabAction::Log);
                }
                if ui
                    .add(egui::Button::new("Save Image...").rounding(theme.radius_medium))
                    .clicked()
                {
                    action = Some(TabAction::SaveImage);
                }
            });
            if let Some((kind, message)) = &tab.log_status {
                ui.label(egui::RichText::new(message).color(theme.status_color(*kind)));
            }
        });
    }

    action
}

fn combo(ui: &mut egui::Ui, id: String, value: &mut String, options: &[&str]) {
    egui::ComboBox::from_id_salt(id)
        .selected_text(value.as_str())
        .width(220.0)
        .show_ui(ui, |ui| {
            for option in options {
                ui.selectable_value(value, option.to_string(), *option);
            }
        });
}

/// Decodes PNG bytes into a texture-ready image; runs on the worker task.
fn decode_preview(bytes: &[u8]) -> Option<egui::ColorImage> {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            let rgba = img.to_rgba8();
            let size = [rgba.width() as usize, rgba.height() as usize];
            Some(egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw()))
        }
        Err(e) => {
            warn!("Could not decode generated image: {}", e);
            None
        }
    }
}

/// Wires every client from configuration. Returned notes go to the activity
/// log; a missing Google setup disables logging instead of failing.
pub fn build_studio(config: &AppConfig) -> (Studio, Vec<String>) {
    let client = reqwest::Client::new();
    let mut notes = Vec::new();

    let forms = Arc::new(FormClient::new(
        client.clone(),
        config.jotform_api_base.clone(),
        config.jotform_api_key.clone(),
    ));
    let openai = Arc::new(ChatClient::new(
        client.clone(),
        Provider::OpenAi,
        config.openai_api_base.clone(),
        config.openai_api_key.clone(),
    ));
    let groq = Arc::new(ChatClient::new(
        client.clone(),
        Provider::Groq,
        config.groq_api_base.clone(),
        config.groq_api_key.clone(),
    ));
    let llm = Arc::new(LlmRouter::new(openai, groq));
    let prompts = PromptConstructor::new(
        forms,
        Arc::new(ColorExtractor::new(client.clone())),
        llm,
        config.prompts_dir(),
    );

    let remover: Arc<dyn BackgroundRemover> = match &config.rembg_endpoint {
        Some(endpoint) => {
            notes.push(format!("Background removal via rembg at {}", endpoint));
            Arc::new(RembgService::new(client.clone(), endpoint.clone()))
        }
        None => {
            notes.push("Background removal via local corner keying".to_string());
            Arc::new(CornerKeyRemover::default())
        }
    };

    let logger = match (config.log_target(), &config.google_service_account_file) {
        (Some(target), Some(key_file)) => {
            match ServiceAccountAuth::from_file(key_file) {
                Ok(auth) => {
                    notes.push(format!(
                        "Logging to tab {} as {}",
                        target.sheet_name,
                        auth.client_email()
                    ));
                    let auth: Arc<dyn TokenProvider> = Arc::new(auth);
                    Some(ImageLogger::new(
                        SheetsClient::new(client.clone(), SHEETS_API_BASE.to_string(), auth.clone()),
                        DriveClient::new(client.clone(), DRIVE_UPLOAD_BASE.to_string(), auth),
                        target,
                    ))
                }
                Err(e) => {
                    notes.push(format!("Logging disabled: {}", e));
                    None
                }
            }
        }
        _ => {
            notes.push(format!(
                "Logging disabled, missing: {}",
                config.missing_logging_settings().join(", ")
            ));
            None
        }
    };

    let images = SdClient::new(client, config.sd_endpoint.clone());
    (Studio::new(prompts, images, remover, logger), notes)
}
