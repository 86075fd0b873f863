use crate::form_api::FORM_API_BASE;
use crate::image_logger::LogTarget;
use crate::llm::{GROQ_API_BASE, OPENAI_API_BASE};
use crate::sd_client::DEFAULT_SD_ENDPOINT;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SHEET_NAME: &str = "Logs";
pub const DEFAULT_PROMPTS_DIR: &str = "prompts";
pub const USERS: [&str; 5] = ["Burak", "Çağlar", "Furkan", "Esra", "Melike"];
pub const DEFAULT_USER: &str = "Furkan";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub jotform_api_key: String,
    pub jotform_api_base: String,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub groq_api_key: String,
    pub groq_api_base: String,
    pub sd_endpoint: String,
    /// rembg server; the local corner-key remover is used when unset.
    pub rembg_endpoint: Option<String>,
    pub log_spreadsheet_id: String,
    pub log_sheet_name: String,
    pub log_drive_folder_id: String,
    pub google_service_account_file: Option<String>,
    pub prompts_dir: String,
    pub user: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jotform_api_key: String::new(),
            jotform_api_base: FORM_API_BASE.to_string(),
            openai_api_key: String::new(),
            openai_api_base: OPENAI_API_BASE.to_string(),
            groq_api_key: String::new(),
            groq_api_base: GROQ_API_BASE.to_string(),
            sd_endpoint: DEFAULT_SD_ENDPOINT.to_string(),
            rembg_endpoint: None,
            log_spreadsheet_id: String::new(),
            log_sheet_name: DEFAULT_SHEET_NAME.to_string(),
            log_drive_folder_id: String::new(),
            google_service_account_file: None,
            prompts_dir: DEFAULT_PROMPTS_DIR.to_string(),
            user: DEFAULT_USER.to_string(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/FormImageStudio/config.json`, creating the directory.
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("FormImageStudio");
        if !config_dir.exists() {
            if let Err(e) = fs::create_dir_all(&config_dir) {
                warn!("Failed to create config directory: {}", e);
            }
        }
        config_dir.join("config.json")
    }

    pub fn load(path: &Path) -> Option<AppConfig> {
        if !path.exists() {
            info!("Config file does not exist at: {:?}", path);
            return None;
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse config: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file: {}", e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Stores the selected user in the config file. Only the file's own
    /// values are written back, never ones layered on from the environment.
    pub fn persist_user(path: &Path, user: &str) -> std::io::Result<()> {
        let mut stored = Self::load(path).unwrap_or_default();
        stored.user = user.to_string();
        stored.save(path)
    }

    /// File config, then the process environment (and `.env`) on top.
    pub fn resolve(path: &Path) -> AppConfig {
        let mut config = Self::load(path).unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overrides fields from environment variables. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let strings: [(&str, &mut String); 11] = [
            ("JOTFORM_API_KEY", &mut self.jotform_api_key),
            ("JOTFORM_API_BASE", &mut self.jotform_api_base),
            ("OPENAI_API_KEY", &mut self.openai_api_key),
            ("OPENAI_API_BASE", &mut self.openai_api_base),
            ("GROQ_API_KEY", &mut self.groq_api_key),
            ("GROQ_API_BASE", &mut self.groq_api_base),
            ("SD_ENDPOINT", &mut self.sd_endpoint),
            ("LOG_SPREADSHEET_ID", &mut self.log_spreadsheet_id),
            ("LOG_SHEET_NAME", &mut self.log_sheet_name),
            ("LOG_DRIVE_FOLDER_ID", &mut self.log_drive_folder_id),
            ("PROMPTS_DIR", &mut self.prompts_dir),
        ];
        for (key, field) in strings {
            if let Some(value) = get(key) {
                *field = value;
            }
        }

        if let Some(value) = get("REMBG_ENDPOINT") {
            self.rembg_endpoint = Some(value);
        }
        if let Some(value) = get("GOOGLE_SERVICE_ACCOUNT_FILE") {
            self.google_service_account_file = Some(value);
        }
    }

    /// Logging needs a spreadsheet, a Drive folder and a service account.
    pub fn log_target(&self) -> Option<LogTarget> {
        if self.log_spreadsheet_id.is_empty()
            || self.log_drive_folder_id.is_empty()
            || self.google_service_account_file.is_none()
        {
            return None;
        }
        Some(LogTarget {
            spreadsheet_id: self.log_spreadsheet_id.clone(),
            sheet_name: self.log_sheet_name.clone(),
            folder_id: self.log_drive_folder_id.clone(),
        })
    }

    pub fn missing_logging_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.log_spreadsheet_id.is_empty() {
            missing.push("LOG_SPREADSHEET_ID");
        }
        if self.log_drive_folder_id.is_empty() {
            missing.push("LOG_DRIVE_FOLDER_ID");
        }
        if self.google_service_account_file.is_none() {
            missing.push("GOOGLE_SERVICE_ACCOUNT_FILE");
        }
        missing
    }

    pub fn prompts_dir(&self) -> PathBuf {
        PathBuf::from(&self.prompts_dir)
    }
}

/// First four characters of a secret, for log lines.
pub fn masked(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sd_endpoint, "http://127.0.0.1:7860");
        assert_eq!(config.log_sheet_name, "Logs");
        assert_eq!(config.prompts_dir, "prompts");
        assert_eq!(config.user, "Furkan");
        assert!(config.log_target().is_none());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("SD_ENDPOINT", "http://gpu-box:7860"),
            ("LOG_SHEET_NAME", ""),
            ("REMBG_ENDPOINT", "http://localhost:7000"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig {
            openai_api_key: "sk-file".into(),
            log_sheet_name: "Avatars".into(),
            ..AppConfig::default()
        };
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.openai_api_key, "sk-env");
        assert_eq!(config.sd_endpoint, "http://gpu-box:7860");
        assert_eq!(config.log_sheet_name, "Avatars");
        assert_eq!(config.rembg_endpoint.as_deref(), Some("http://localhost:7000"));
    }

    #[test]
    fn test_log_target_requires_all_google_settings() {
        let mut config = AppConfig {
            log_spreadsheet_id: "sheet".into(),
            log_drive_folder_id: "folder".into(),
            ..AppConfig::default()
        };
        assert_eq!(config.missing_logging_settings(), vec!["GOOGLE_SERVICE_ACCOUNT_FILE"]);
        assert!(config.log_target().is_none());

        config.google_service_account_file = Some("sa.json".into());
        let target = config.log_target().unwrap();
        assert_eq!(target.spreadsheet_id, "sheet");
        assert_eq!(target.sheet_name, "Logs");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            jotform_api_key: "jf".into(),
            user: "Esra".into(),
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path), Some(config));
    }

    #[test]
    fn test_persist_user_keeps_env_secrets_out_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        AppConfig {
            groq_api_key: "gsk-file".into(),
            ..AppConfig::default()
        }
        .save(&path)
        .unwrap();

        let mut resolved = AppConfig::load(&path).unwrap();
        resolved.apply_env(|key| (key == "OPENAI_API_KEY").then(|| "sk-from-env".to_string()));
        assert_eq!(resolved.openai_api_key, "sk-from-env");

        AppConfig::persist_user(&path, "Melike").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("sk-from-env"));
        let stored = AppConfig::load(&path).unwrap();
        assert_eq!(stored.user, "Melike");
        assert_eq!(stored.groq_api_key, "gsk-file");
        assert_eq!(stored.openai_api_key, "");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"groq_api_key":"gsk"}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.groq_api_key, "gsk");
        assert_eq!(config.groq_api_base, GROQ_API_BASE);
    }

    #[test]
    fn test_masked() {
        assert_eq!(masked("sk-abcdef"), "sk-a…");
        assert_eq!(masked(""), "<unset>");
    }
}
