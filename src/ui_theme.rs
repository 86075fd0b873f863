use eframe::egui::{self, Color32, FontFamily, FontId, Rounding, Shadow, Stroke, Vec2};

/// Severity of a status line shown in a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

pub struct StudioTheme {
    // Colors
    pub background: Color32,
    pub surface: Color32,
    pub surface_hover: Color32,
    pub surface_active: Color32,
    pub card: Color32,
    pub border: Color32,
    pub border_active: Color32,
    pub text_primary: Color32,
    pub text_secondary: Color32,
    pub text_muted: Color32,
    pub accent: Color32,
    pub success: Color32,
    pub warning: Color32,
    pub error: Color32,
    pub info: Color32,

    // Spacing
    pub spacing_small: f32,
    pub spacing_medium: f32,
    pub spacing_large: f32,
    pub padding_medium: f32,

    // Border radius
    pub radius_small: Rounding,
    pub radius_medium: Rounding,
    pub radius_large: Rounding,

    // Shadows
    pub shadow_medium: Shadow,

    // Typography
    pub font_small: FontId,
    pub font_medium: FontId,
    pub font_title: FontId,
}

impl Default for StudioTheme {
    fn default() -> Self {
        Self {
            background: Color32::from_rgb(24, 26, 31),
            surface: Color32::from_rgb(40, 43, 51),
            surface_hover: Color32::from_rgb(52, 56, 66),
            surface_active: Color32::from_rgb(64, 69, 81),
            card: Color32::from_rgb(32, 35, 42),
            border: Color32::from_rgb(66, 70, 82),
            border_active: Color32::from_rgb(104, 110, 126),
            text_primary: Color32::from_rgb(240, 242, 246),
            text_secondary: Color32::from_rgb(196, 200, 210),
            text_muted: Color32::from_rgb(136, 142, 156),
            // Form-builder orange
            accent: Color32::from_rgb(255, 97, 0),
            success: Color32::from_rgb(52, 199, 89),
            warning: Color32::from_rgb(255, 179, 0),
            error: Color32::from_rgb(255, 69, 58),
            info: Color32::from_rgb(90, 200, 250),

            spacing_small: 4.0,
            spacing_medium: 8.0,
            spacing_large: 12.0,
            padding_medium: 10.0,

            radius_small: Rounding::same(4.0),
            radius_medium: Rounding::same(8.0),
            radius_large: Rounding::same(12.0),

            shadow_medium: Shadow {
                offset: Vec2::new(0.0, 2.0),
                blur: 8.0,
                spread: 0.0,
                color: Color32::from_black_alpha(40),
            },

            font_small: FontId::new(12.0, FontFamily::Proportional),
            font_medium: FontId::new(14.0, FontFamily::Proportional),
            font_title: FontId::new(20.0, FontFamily::Proportional),
        }
    }
}

impl StudioTheme {
    pub fn apply_to_ctx(&self, ctx: &egui::Context) {
        let mut style = (*ctx.style()).clone();

        style.visuals.panel_fill = self.background;
        style.visuals.window_fill = self.background;
        style.visuals.window_shadow = self.shadow_medium;
        style.visuals.window_rounding = self.radius_large;
        style.visuals.window_stroke = Stroke::new(1.0, self.background);
        style.visuals.extreme_bg_color = self.surface;

        style.visuals.button_frame = true;
        style.visuals.widgets.inactive.fg_stroke = Stroke::new(1.0, self.text_primary);
        style.visuals.widgets.inactive.bg_fill = self.surface;
        style.visuals.widgets.inactive.weak_bg_fill = self.surface;
        style.visuals.widgets.inactive.rounding = self.radius_medium;
        style.visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, self.border);

        style.visuals.widgets.hovered.fg_stroke = Stroke::new(1.0, self.text_primary);
        style.visuals.widgets.hovered.bg_fill = self.surface_hover;
        style.visuals.widgets.hovered.weak_bg_fill = self.surface_hover;
        style.visuals.widgets.hovered.rounding = self.radius_medium;
        style.visuals.widgets.hovered.bg_stroke = Stroke::new(1.0, self.border_active);

        style.visuals.widgets.active.fg_stroke = Stroke::new(1.0, self.text_primary);
        style.visuals.widgets.active.bg_fill = self.surface_active;
        style.visuals.widgets.active.weak_bg_fill = self.surface_active;
        style.visuals.widgets.active.rounding = self.radius_medium;
        style.visuals.widgets.active.bg_stroke = Stroke::new(1.0, self.border_active);

        style.visuals.text_cursor.stroke = Stroke::new(2.0, self.accent);
        style.visuals.selection.bg_fill = self.accent.gamma_multiply(0.6);
        style.visuals.selection.stroke = Stroke::new(1.0, self.accent);
        style.visuals.hyperlink_color = self.accent;

        style.text_styles = [
            (egui::TextStyle::Heading, self.font_title.clone()),
            (egui::TextStyle::Body, self.font_medium.clone()),
            (egui::TextStyle::Monospace, FontId::new(13.0, FontFamily::Monospace)),
            (egui::TextStyle::Button, self.font_medium.clone()),
            (egui::TextStyle::Small, self.font_small.clone()),
        ]
        .into();

        ctx.set_style(style);
    }

    pub fn card_frame(&self) -> egui::Frame {
        egui::Frame {
            inner_margin: egui::Margin::same(self.padding_medium),
            rounding: self.radius_large,
            shadow: self.shadow_medium,
            fill: self.card,
            ..Default::default()
        }
    }

    pub fn field_label(&self, text: &str) -> egui::RichText {
        egui::RichText::new(text)
            .size(13.0)
            .color(self.text_secondary)
    }

    pub fn section_title(&self, text: &str) -> egui::RichText {
        egui::RichText::new(text)
            .size(16.0)
            .strong()
            .color(self.text_primary)
    }

    pub fn status_color(&self, kind: StatusKind) -> Color32 {
        match kind {
            StatusKind::Info => self.info,
            StatusKind::Success => self.success,
            StatusKind::Warning => self.warning,
            StatusKind::Error => self.error,
        }
    }
}
