use crate::columns::{ColumnRegistry, LogColumn};
use crate::drive::{view_url, DriveClient};
use crate::sd_client::{GenerationInfo, SdError};
use crate::sheets::{a1_range, first_row_of, GoogleApiError, SheetsClient};
use log::{info, warn};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

pub const IMAGE_CELL_PX: u32 = 300;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("could not read generation info: {0}")]
    Info(#[from] SdError),

    #[error("{0}")]
    Google(#[from] GoogleApiError),
}

/// Where log rows and images go.
#[derive(Debug, Clone)]
pub struct LogTarget {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub folder_id: String,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub image_bytes: Vec<u8>,
    pub rating: f32,
    /// Raw info string from the generation server.
    pub info: String,
    pub user: String,
    pub form_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogReceipt {
    pub row: Option<u32>,
    pub file_id: String,
    pub image_name: String,
}

struct TabState {
    sheet_id: i64,
    registry: ColumnRegistry,
}

/// Appends generated images and their parameters to a spreadsheet tab.
/// Rows are append-only and the header row only ever grows.
pub struct ImageLogger {
    sheets: SheetsClient,
    drive: DriveClient,
    target: LogTarget,
    state: Mutex<Option<TabState>>,
}

impl ImageLogger {
    pub fn new(sheets: SheetsClient, drive: DriveClient, target: LogTarget) -> Self {
        Self {
            sheets,
            drive,
            target,
            state: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    pub fn spreadsheet_url(&self) -> String {
        format!(
            "https://docs.google.com/spreadsheets/d/{}/edit",
            self.target.spreadsheet_id
        )
    }

    /// Not transactional: if the append fails after the upload, the uploaded
    /// file stays in the folder.
    pub async fn log(&self, entry: LogEntry) -> Result<LogReceipt, LogError> {
        let info = GenerationInfo::parse(&entry.info)?;

        let mut state = self.state.lock().await;
        let tab = match state.take() {
            Some(tab) => tab,
            None => self.prepare_tab().await?,
        };
        let result = self.append_entry(&tab, &info, entry).await;
        *state = Some(tab);
        result
    }

    async fn append_entry(
        &self,
        tab: &TabState,
        info: &GenerationInfo,
        entry: LogEntry,
    ) -> Result<LogReceipt, LogError> {
        let image_name = image_name(info);
        let row_values = row_values(info, &entry);
        let file_id = self
            .drive
            .upload(
                &self.target.folder_id,
                &image_name,
                "image/png",
                entry.image_bytes,
            )
            .await?;

        let mut values = row_values;
        values.push((LogColumn::Image, image_formula(&file_id)));
        let row = tab.registry.layout(&values);
        let range = a1_range(&self.target.sheet_name, "A1");
        let updated = self
            .sheets
            .append_values(&self.target.spreadsheet_id, &range, &[row])
            .await?;
        let row_number = first_row_of(&updated);
        info!("Data appended to {} for {}", updated, image_name);

        if let (Some(row_number), Some(column)) =
            (row_number, tab.registry.index_of(LogColumn::Image))
        {
            if let Err(e) = self.resize_image_cell(tab.sheet_id, row_number, column).await {
                warn!("An error occurred while adjusting cell size: {}", e);
            }
        }

        Ok(LogReceipt {
            row: row_number,
            file_id,
            image_name,
        })
    }

    /// Finds or creates the tab and brings its header row up to date.
    async fn prepare_tab(&self) -> Result<TabState, GoogleApiError> {
        let spreadsheet_id = &self.target.spreadsheet_id;
        let name = &self.target.sheet_name;

        let existing = self
            .sheets
            .tabs(spreadsheet_id)
            .await?
            .into_iter()
            .find(|tab| &tab.title == name);
        let sheet_id = match existing {
            Some(tab) => tab.sheet_id,
            None => {
                info!("Creating log tab {}", name);
                self.sheets.add_tab(spreadsheet_id, name).await?.sheet_id
            }
        };

        let header = self
            .sheets
            .get_values(spreadsheet_id, &a1_range(name, "1:1"))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let (registry, added) = ColumnRegistry::reconcile(&header);
        if added {
            info!(
                "Extending header row of {} from {} to {} columns",
                name,
                header.len(),
                registry.headers().len()
            );
            self.sheets
                .update_values(
                    spreadsheet_id,
                    &a1_range(name, "A1"),
                    &[registry.headers().to_vec()],
                )
                .await?;
        }

        Ok(TabState { sheet_id, registry })
    }

    async fn resize_image_cell(
        &self,
        sheet_id: i64,
        row_number: u32,
        column: usize,
    ) -> Result<(), GoogleApiError> {
        let requests = vec![
            resize_request(sheet_id, "ROWS", (row_number as usize).saturating_sub(1)),
            resize_request(sheet_id, "COLUMNS", column),
        ];
        self.sheets
            .batch_update(&self.target.spreadsheet_id, requests)
            .await?;
        info!(
            "Adjusted cell size for row {} and column {}",
            row_number,
            column + 1
        );
        Ok(())
    }
}

fn resize_request(sheet_id: i64, dimension: &str, start: usize) -> serde_json::Value {
    json!({
        "updateDimensionProperties": {
            "range": {
                "sheetId": sheet_id,
                "dimension": dimension,
                "startIndex": start,
                "endIndex": start + 1
            },
            "properties": { "pixelSize": IMAGE_CELL_PX },
            "fields": "pixelSize"
        }
    })
}

fn image_name(info: &GenerationInfo) -> String {
    let stem = info
        .job_timestamp()
        .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d%H%M%S").to_string());
    format!("{}.png", stem)
}

pub fn image_formula(file_id: &str) -> String {
    format!(
        "=IMAGE(\"{}\", 4, {}, {})",
        view_url(file_id),
        IMAGE_CELL_PX,
        IMAGE_CELL_PX
    )
}

fn row_values(info: &GenerationInfo, entry: &LogEntry) -> Vec<(LogColumn, String)> {
    vec![
        (LogColumn::Rating, entry.rating.to_string()),
        (LogColumn::Prompt, info.prompt()),
        (LogColumn::NegativePrompt, info.negative_prompt()),
        (LogColumn::Seed, info.seed()),
        (LogColumn::Width, info.width()),
        (LogColumn::Height, info.height()),
        (LogColumn::SamplerName, info.sampler_name()),
        (LogColumn::CfgScale, info.cfg_scale()),
        (LogColumn::Steps, info.steps()),
        (LogColumn::SdModelName, info.model_name()),
        (LogColumn::ScheduleType, info.schedule_type()),
        (LogColumn::User, entry.user.clone()),
        (
            LogColumn::FormId,
            entry.form_id.map(|id| id.to_string()).unwrap_or_default(),
        ),
    ]
}
