use std::error::Error as _;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use thiserror::Error;

const SYSTEM_MARKER: &str = "SYSTEM_PROMPT=\"\"\"";
const USER_MARKER: &str = "USER_PROMPT=\"\"\"";
const BLOCK_END: &str = "\"\"\"";

#[derive(Error, Debug)]
pub enum PromptFileError {
    #[error("failed to read prompt file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt file {path} has no {block} block")]
    MissingBlock { path: PathBuf, block: &'static str },

    #[error("failed to render user prompt: {0}")]
    Render(String),
}

/// System and user prompt read from a template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Reads `SYSTEM_PROMPT="""..."""` and `USER_PROMPT="""..."""` from `path`
/// and renders the user prompt's `{{ name }}` placeholders from `vars`.
pub fn read_prompts<P: AsRef<Path>>(
    path: P,
    vars: &[(&str, &str)],
) -> Result<PromptPair, PromptFileError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| PromptFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_prompts(&content, vars).map_err(|e| match e {
        PromptFileError::MissingBlock { block, .. } => PromptFileError::MissingBlock {
            path: path.to_path_buf(),
            block,
        },
        other => other,
    })
}

pub fn parse_prompts(content: &str, vars: &[(&str, &str)]) -> Result<PromptPair, PromptFileError> {
    let system_prompt = extract_block(content, SYSTEM_MARKER).ok_or(PromptFileError::MissingBlock {
        path: PathBuf::new(),
        block: "SYSTEM_PROMPT",
    })?;
    let user_template = extract_block(content, USER_MARKER).ok_or(PromptFileError::MissingBlock {
        path: PathBuf::new(),
        block: "USER_PROMPT",
    })?;

    Ok(PromptPair {
        system_prompt: system_prompt.to_string(),
        user_prompt: interpolate(user_template, vars)?,
    })
}

fn extract_block<'a>(content: &'a str, marker: &str) -> Option<&'a str> {
    let start = content.find(marker)? + marker.len();
    let len = content[start..].find(BLOCK_END)?;
    Some(&content[start..start + len])
}

/// Renders a user prompt with `tera`. Placeholders are `{{ name }}`; a
/// placeholder without a value is an error naming it.
pub fn interpolate(template: &str, vars: &[(&str, &str)]) -> Result<String, PromptFileError> {
    let mut context = Context::new();
    for (name, value) in vars {
        context.insert(*name, value);
    }
    Tera::one_off(template, &context, false).map_err(render_error)
}

// tera keeps the useful part (which variable, which line) in the source chain.
fn render_error(err: tera::Error) -> PromptFileError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    PromptFileError::Render(message)
}

/// `prompts/avatar_img_prompt.txt` -> `prompts/avatar_img_prompt_wo_color.txt`
pub fn colorless_variant(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}_wo_color.{}", stem, ext.to_string_lossy()),
        None => format!("{}_wo_color", stem),
    };
    path.with_file_name(file_name)
}
