use std::collections::HashMap;
use std::fmt;

/// Every field the logger writes, in the order new headers are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogColumn {
    Image,
    Rating,
    Prompt,
    NegativePrompt,
    Seed,
    Width,
    Height,
    SamplerName,
    CfgScale,
    Steps,
    SdModelName,
    ScheduleType,
    User,
    FormId,
}

impl LogColumn {
    pub const ALL: [LogColumn; 14] = [
        LogColumn::Image,
        LogColumn::Rating,
        LogColumn::Prompt,
        LogColumn::NegativePrompt,
        LogColumn::Seed,
        LogColumn::Width,
        LogColumn::Height,
        LogColumn::SamplerName,
        LogColumn::CfgScale,
        LogColumn::Steps,
        LogColumn::SdModelName,
        LogColumn::ScheduleType,
        LogColumn::User,
        LogColumn::FormId,
    ];

    pub fn header(self) -> &'static str {
        match self {
            LogColumn::Image => "Image",
            LogColumn::Rating => "Rating",
            LogColumn::Prompt => "Prompt",
            LogColumn::NegativePrompt => "Negative Prompt",
            LogColumn::Seed => "Seed",
            LogColumn::Width => "Width",
            LogColumn::Height => "Height",
            LogColumn::SamplerName => "Sampler Name",
            LogColumn::CfgScale => "CFG Scale",
            LogColumn::Steps => "Steps",
            LogColumn::SdModelName => "SD Model Name",
            LogColumn::ScheduleType => "Schedule Type",
            LogColumn::User => "User",
            LogColumn::FormId => "Form ID",
        }
    }
}

impl fmt::Display for LogColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Header row of the log tab plus the index of every known field in it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRegistry {
    headers: Vec<String>,
    index: HashMap<LogColumn, usize>,
}

impl ColumnRegistry {
    /// Keeps `existing` headers as they are and appends any missing field.
    /// The flag is true when the header row has to be written back.
    pub fn reconcile(existing: &[String]) -> (Self, bool) {
        let mut headers = existing.to_vec();
        let mut added = false;
        for column in LogColumn::ALL {
            if !headers.iter().any(|h| h == column.header()) {
                headers.push(column.header().to_string());
                added = true;
            }
        }

        let index = LogColumn::ALL
            .iter()
            .filter_map(|&column| {
                headers
                    .iter()
                    .position(|h| h == column.header())
                    .map(|i| (column, i))
            })
            .collect();

        (Self { headers, index }, added)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn index_of(&self, column: LogColumn) -> Option<usize> {
        self.index.get(&column).copied()
    }

    /// Lays `values` out against the header row. Columns this app does not
    /// own stay empty.
    pub fn layout(&self, values: &[(LogColumn, String)]) -> Vec<String> {
        let mut row = vec![String::new(); self.headers.len()];
        for (column, value) in values {
            if let Some(i) = self.index_of(*column) {
                row[i] = value.clone();
            }
        }
        row
    }
}
