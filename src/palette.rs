use async_trait::async_trait;
use image::imageops::FilterType;
use kmeans_colors::get_kmeans;
use log::{debug, info};
use palette::Srgb;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Number of k-means clusters requested for raster logos.
pub const RASTER_CLUSTERS: usize = 10;
/// Colors handed to the describer.
pub const LOGO_COLORS: usize = 3;
const RESIZE_TO: u32 = 256;
const KMEANS_MAX_ITER: usize = 20;
const KMEANS_CONVERGE: f32 = 1e-4;
const KMEANS_SEED: u64 = 0;

#[derive(Error, Debug)]
pub enum PaletteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to fetch image, status code {status}")]
    Fetch { status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image has no opaque pixels")]
    Empty,

    #[error("palette worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parses `#rgb` or `#rrggbb` (leading `#` optional, case-insensitive).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        let full: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return None,
        };
        let channel = |i: usize| u8::from_str_radix(&full[i..i + 2], 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0, self.1, self.2)
    }
}

/// Colors ordered from most to least frequent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Palette(Vec<Rgb>);

impl Palette {
    pub fn new(colors: Vec<Rgb>) -> Self {
        Self(colors)
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn top(&self, n: usize) -> Palette {
        Palette(self.0.iter().take(n).copied().collect())
    }
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Rgb::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
}

impl ImageSource {
    fn is_svg(&self) -> bool {
        match self {
            ImageSource::Path(p) => p.to_string_lossy().to_lowercase().contains(".svg"),
            ImageSource::Url(u) => u.to_lowercase().contains(".svg"),
            ImageSource::Bytes(b) => {
                let head = String::from_utf8_lossy(&b[..b.len().min(256)]);
                let head = head.trim_start();
                head.starts_with("<svg") || head.starts_with("<?xml")
            }
        }
    }
}

/// Anything that can turn a logo URL into its dominant colors.
#[async_trait]
pub trait PaletteSource: Send + Sync {
    async fn logo_palette(&self, logo_url: &str) -> Result<Palette, PaletteError>;
}

pub struct ColorExtractor {
    client: reqwest::Client,
}

impl ColorExtractor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn extract(&self, source: ImageSource) -> Result<Palette, PaletteError> {
        if source.is_svg() {
            let document = match source {
                ImageSource::Url(url) => self.fetch(&url).await?,
                ImageSource::Path(path) => tokio::fs::read(&path).await?,
                ImageSource::Bytes(bytes) => bytes,
            };
            return Ok(svg_palette(&String::from_utf8_lossy(&document)));
        }

        let bytes = match source {
            ImageSource::Url(url) => self.fetch(&url).await?,
            ImageSource::Path(path) => tokio::fs::read(&path).await?,
            ImageSource::Bytes(bytes) => bytes,
        };

        // k-means over a few thousand pixels is CPU-bound; keep it off the reactor.
        tokio::task::spawn_blocking(move || raster_palette(&bytes, RASTER_CLUSTERS))
            .await
            .map_err(|e| PaletteError::Worker(e.to_string()))?
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PaletteError> {
        debug!("Fetching logo from {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PaletteError::Fetch {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl PaletteSource for ColorExtractor {
    async fn logo_palette(&self, logo_url: &str) -> Result<Palette, PaletteError> {
        let palette = self
            .extract(ImageSource::Url(logo_url.to_string()))
            .await?
            .top(LOGO_COLORS);
        info!("Colors extracted from the logo: {}", palette);
        Ok(palette)
    }
}

fn hex_literal() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"#[0-9A-Fa-f]{6}|#[0-9A-Fa-f]{3}").expect("hex color pattern is valid")
    })
}

/// Counts hex color literals in an SVG document, most frequent first.
/// Ties keep the order in which colors first appear.
pub fn svg_palette(document: &str) -> Palette {
    let mut order: Vec<Rgb> = Vec::new();
    let mut counts: HashMap<Rgb, usize> = HashMap::new();

    for literal in hex_literal().find_iter(document) {
        let Some(color) = Rgb::from_hex(&literal.as_str().to_lowercase()) else {
            continue;
        };
        let count = counts.entry(color).or_insert(0);
        if *count == 0 {
            order.push(color);
        }
        *count += 1;
    }

    // sort_by is stable, so first-seen order survives equal counts
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    Palette(order)
}

/// Clusters the opaque pixels of an encoded raster image into `clusters`
/// centroids and orders them by cluster size.
pub fn raster_palette(bytes: &[u8], clusters: usize) -> Result<Palette, PaletteError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > RESIZE_TO || img.height() > RESIZE_TO {
        img.resize(RESIZE_TO, RESIZE_TO, FilterType::Triangle)
    } else {
        img
    };

    let pixels: Vec<Srgb<f32>> = img
        .to_rgba8()
        .pixels()
        .filter(|p| p[3] > 0)
        .map(|p| Srgb::new(p[0], p[1], p[2]).into_format::<f32>())
        .collect();

    if pixels.is_empty() {
        return Err(PaletteError::Empty);
    }

    let k = clusters.min(pixels.len()).max(1);
    let result = get_kmeans(
        k,
        KMEANS_MAX_ITER,
        KMEANS_CONVERGE,
        false,
        &pixels,
        KMEANS_SEED,
    );

    let mut sizes = vec![0usize; result.centroids.len()];
    for &index in &result.indices {
        if let Some(size) = sizes.get_mut(index as usize) {
            *size += 1;
        }
    }

    let mut ranked: Vec<(usize, Rgb)> = result
        .centroids
        .iter()
        .zip(sizes)
        .filter(|(_, size)| *size > 0)
        .map(|(centroid, size)| {
            let c: Srgb<u8> = (*centroid).into_format();
            (size, Rgb(c.red, c.green, c.blue))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    let mut colors: Vec<Rgb> = Vec::with_capacity(ranked.len());
    for (_, color) in ranked {
        if !colors.contains(&color) {
            colors.push(color);
        }
    }
    Ok(Palette(colors))
}
