//! Local storage for uploaded images.

use std::path::PathBuf;

use uuid::Uuid;

use crate::Result;

#[derive(Clone, Debug)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub const IMAGE_DIR: &'static str = "images";

    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    /// Writes an upload under `images/` and returns its path relative to the media root.
    /// Every upload gets a fresh prefix so paths never collide.
    pub async fn save_image(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(Self::IMAGE_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let relative = format!("{}/{}_{}", Self::IMAGE_DIR, Uuid::new_v4().simple(), sanitize(file_name));
        tokio::fs::write(self.root.join(&relative), bytes).await?;
        Ok(relative)
    }
}

fn sanitize(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "upload".to_string() } else { cleaned.to_string() }
}
