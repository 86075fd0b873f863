mod app;
mod background;
mod color_describer;
mod columns;
mod config;
mod drive;
mod form_api;
mod google_auth;
mod image_logger;
mod llm;
mod palette;
mod prompt_constructor;
mod prompt_reader;
mod sd_client;
mod sheets;
mod studio;
mod ui_theme;

use config::AppConfig;
use eframe::egui;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; real environment variables still apply.
    dotenv::dotenv().ok();
    env_logger::init();

    let config_path = AppConfig::default_path();
    let config = AppConfig::resolve(&config_path);
    let runtime = tokio::runtime::Runtime::new()?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 860.0])
            .with_min_inner_size([760.0, 560.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Form Image Studio",
        options,
        Box::new(move |_cc| Ok(Box::new(app::StudioApp::new(runtime, config, config_path)))),
    )?;
    Ok(())
}
