use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const FORM_API_BASE: &str = "https://api.jotform.com";
const LOGO_KEY: &str = "@formCoverImg";

#[derive(Error, Debug)]
pub enum FormApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("form {0} has no questions")]
    NoQuestions(u64),

    #[error("form {0}: first question has no text")]
    MissingTitle(u64),
}

/// Form metadata needed for prompt construction.
#[async_trait]
pub trait FormMetadata: Send + Sync {
    async fn title(&self, form_id: u64) -> Result<String, FormApiError>;

    /// `Ok(None)` when the form has no cover image.
    async fn logo_url(&self, form_id: u64) -> Result<Option<String>, FormApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    content: T,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(rename = "styleJSON", default)]
    style_json: Option<String>,
}

pub struct FormClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FormClient {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        form_id: u64,
        resource: &str,
    ) -> Result<T, FormApiError> {
        let url = format!(
            "{}/form/{}/{}",
            self.base_url.trim_end_matches('/'),
            form_id,
            resource
        );

        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            warn!("Form API request failed with status code: {}", status);
            return Err(FormApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.content)
    }
}

#[async_trait]
impl FormMetadata for FormClient {
    async fn title(&self, form_id: u64) -> Result<String, FormApiError> {
        let questions: Map<String, Value> = self.get(form_id, "questions").await?;
        first_question_text(form_id, &questions)
    }

    async fn logo_url(&self, form_id: u64) -> Result<Option<String>, FormApiError> {
        let properties: Properties = self.get(form_id, "properties").await?;
        let logo = properties
            .style_json
            .as_deref()
            .and_then(logo_from_style_json);
        if logo.is_none() {
            info!("Form {} doesn't have a logo, continuing without color extraction", form_id);
        }
        Ok(logo)
    }
}

/// Questions come back keyed by question id; the heading is the first entry
/// in document order.
fn first_question_text(form_id: u64, questions: &Map<String, Value>) -> Result<String, FormApiError> {
    let (_, first) = questions
        .iter()
        .next()
        .ok_or(FormApiError::NoQuestions(form_id))?;
    first
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(FormApiError::MissingTitle(form_id))
}

/// `styleJSON` arrives as an escaped string; strip the escapes before parsing.
fn logo_from_style_json(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\\', "");
    let style: Map<String, Value> = match serde_json::from_str(&cleaned) {
        Ok(style) => style,
        Err(e) => {
            warn!("Could not parse form styleJSON: {}", e);
            return None;
        }
    };
    style
        .get(LOGO_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> FormClient {
        FormClient::new(reqwest::Client::new(), server.url(), "key-123".into())
    }

    #[tokio::test]
    async fn test_title_is_first_question_text() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/form/42/questions")
            .match_query(Matcher::UrlEncoded("apiKey".into(), "key-123".into()))
            .with_status(200)
            .with_body(
                r#"{"responseCode":200,"content":{
                    "7":{"type":"control_head","text":"Summer Coding Camp"},
                    "2":{"type":"control_textbox","text":"Your name"}}}"#,
            )
            .create_async()
            .await;

        assert_eq!(client(&server).title(42).await.unwrap(), "Summer Coding Camp");
    }

    #[tokio::test]
    async fn test_title_fails_loudly_on_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/form/42/questions")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let err = client(&server).title(42).await.unwrap_err();
        assert!(matches!(err, FormApiError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_logo_url_from_style_json() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/form/42/properties")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r##"{"content":{"styleJSON":"{\\\"@formCoverImg\\\":\\\"https://cdn.example.com/logo.png\\\",\\\"@pageColor\\\":\\\"#fff\\\"}"}}"##,
            )
            .create_async()
            .await;

        assert_eq!(
            client(&server).logo_url(42).await.unwrap().as_deref(),
            Some("https://cdn.example.com/logo.png")
        );
    }

    #[tokio::test]
    async fn test_missing_logo_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/form/7/properties")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r##"{"content":{"styleJSON":"{\"@pageColor\":\"#fff\"}"}}"##)
            .create_async()
            .await;

        assert_eq!(client(&server).logo_url(7).await.unwrap(), None);
    }

    #[test]
    fn test_empty_questions() {
        assert!(matches!(
            first_question_text(1, &Map::new()),
            Err(FormApiError::NoQuestions(1))
        ));
    }
}
