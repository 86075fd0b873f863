use async_trait::async_trait;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use log::info;
use reqwest::multipart;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackgroundError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("background service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to process image: {0}")]
    Image(#[from] image::ImageError),

    #[error("background worker failed: {0}")]
    Worker(String),
}

/// Takes encoded image bytes and returns a PNG with a transparent background.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove(&self, image_bytes: Vec<u8>) -> Result<Vec<u8>, BackgroundError>;
}

/// Client for a rembg server (`rembg s`), which segments the foreground with
/// its own model.
pub struct RembgService {
    client: reqwest::Client,
    endpoint: String,
}

impl RembgService {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl BackgroundRemover for RembgService {
    async fn remove(&self, image_bytes: Vec<u8>) -> Result<Vec<u8>, BackgroundError> {
        let url = format!("{}/api/remove", self.endpoint.trim_end_matches('/'));
        let part = multipart::Part::bytes(image_bytes)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = multipart::Form::new().part("file", part);

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackgroundError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response.bytes().await?.to_vec();
        info!("Background removed by {} ({} bytes)", self.endpoint, bytes.len());
        Ok(bytes)
    }
}

/// Local fallback: keys out every pixel close to the top-left corner color.
/// Works for the flat studio backgrounds avatar prompts ask for.
pub struct CornerKeyRemover {
    pub threshold: u8,
}

impl Default for CornerKeyRemover {
    fn default() -> Self {
        Self { threshold: 30 }
    }
}

impl CornerKeyRemover {
    pub fn key_out(&self, image_bytes: &[u8]) -> Result<Vec<u8>, BackgroundError> {
        let img = image::load_from_memory(image_bytes)?.to_rgba8();
        let output = key_out_corner(&img, self.threshold);

        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(output).write_to(&mut buf, ImageOutputFormat::Png)?;
        Ok(buf.into_inner())
    }
}

fn key_out_corner(img: &RgbaImage, threshold: u8) -> RgbaImage {
    let mut output = img.clone();
    if img.width() == 0 || img.height() == 0 {
        return output;
    }
    let corner = *img.get_pixel(0, 0);

    for (x, y, pixel) in img.enumerate_pixels() {
        let close = (0..3).all(|c| pixel[c].abs_diff(corner[c]) < threshold);
        if close {
            output.put_pixel(x, y, Rgba([0, 0, 0, 0]));
        }
    }
    output
}

#[async_trait]
impl BackgroundRemover for CornerKeyRemover {
    async fn remove(&self, image_bytes: Vec<u8>) -> Result<Vec<u8>, BackgroundError> {
        let threshold = self.threshold;
        tokio::task::spawn_blocking(move || CornerKeyRemover { threshold }.key_out(&image_bytes))
            .await
            .map_err(|e| BackgroundError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn subject_on_grey() -> Vec<u8> {
        let img: RgbaImage = ImageBuffer::from_fn(8, 8, |x, y| {
            if (3..5).contains(&x) && (3..5).contains(&y) {
                Rgba([200, 30, 30, 255])
            } else {
                Rgba([128, 128, 130, 255])
            }
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_corner_key_clears_background_only() {
        let png = CornerKeyRemover::default()
            .remove(subject_on_grey())
            .await
            .unwrap();
        let out = image::load_from_memory(&png).unwrap().to_rgba8();

        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(7, 7)[3], 0);
        assert_eq!(*out.get_pixel(3, 3), Rgba([200, 30, 30, 255]));
    }

    #[tokio::test]
    async fn test_rembg_service_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/remove")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data".into()),
            )
            .with_status(200)
            .with_body(b"cutout")
            .create_async()
            .await;

        let service = RembgService::new(reqwest::Client::new(), server.url());
        let out = service.remove(b"png".to_vec()).await.unwrap();
        assert_eq!(out, b"cutout");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rembg_service_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/remove")
            .with_status(503)
            .create_async()
            .await;

        let service = RembgService::new(reqwest::Client::new(), server.url());
        assert!(matches!(
            service.remove(b"png".to_vec()).await,
            Err(BackgroundError::Status { status: 503, .. })
        ));
    }
}
