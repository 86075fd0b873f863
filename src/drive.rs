use crate::google_auth::TokenProvider;
use crate::sheets::{check_status, GoogleApiError};
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com";

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

/// Uploads files into a Drive folder.
pub struct DriveClient {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl DriveClient {
    pub fn new(client: reqwest::Client, base_url: String, auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url,
            auth,
        }
    }

    /// Creates `name` under `folder_id` in a single multipart/related request
    /// and returns the new file id.
    pub async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GoogleApiError> {
        let url = format!(
            "{}/upload/drive/v3/files",
            self.base_url.trim_end_matches('/')
        );
        let metadata = json!({ "name": name, "parents": [folder_id] });
        let boundary = format!("studio-{}", uuid::Uuid::new_v4().simple());
        let body = related_body(&boundary, &metadata.to_string(), mime_type, &bytes);
        let size = bytes.len();

        let token = self.auth.access_token().await?;
        let response = self
            .client
            .post(&url)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id"),
                ("supportsAllDrives", "true"),
            ])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;

        let created: CreatedFile = check_status(response).await?.json().await?;
        info!("Uploaded {} ({} bytes) to Drive as {}", name, size, created.id);
        Ok(created.id)
    }
}

fn related_body(boundary: &str, metadata: &str, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

/// Link that renders a Drive file inline, as used by the sheet `IMAGE` formula.
pub fn view_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?export=view&id={}", file_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_auth::StaticToken;
    use mockito::Matcher;

    #[test]
    fn test_related_body_layout() {
        let body = related_body("xyz", r#"{"name":"a.png"}"#, "image/png", b"PNGDATA");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--xyz\r\nContent-Type: application/json"));
        assert!(text.contains("{\"name\":\"a.png\"}\r\n--xyz\r\nContent-Type: image/png\r\n\r\nPNGDATA"));
        assert!(text.ends_with("\r\n--xyz--\r\n"));
    }

    #[tokio::test]
    async fn test_upload_returns_file_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "multipart".into()),
                Matcher::UrlEncoded("fields".into(), "id".into()),
            ]))
            .match_header("authorization", "Bearer tok")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/related; boundary=studio-".into()),
            )
            .match_body(Matcher::Regex(r#""parents":\["folder-9"\]"#.into()))
            .with_status(200)
            .with_body(r#"{"id":"file-abc"}"#)
            .create_async()
            .await;

        let drive = DriveClient::new(
            reqwest::Client::new(),
            server.url(),
            Arc::new(StaticToken("tok".into())),
        );
        let id = drive
            .upload("folder-9", "img.png", "image/png", b"png".to_vec())
            .await
            .unwrap();
        assert_eq!(id, "file-abc");
        mock.assert_async().await;
    }
}
