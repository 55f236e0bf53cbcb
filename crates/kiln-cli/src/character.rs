//! Character spec files (TOML or JSON) and the 3D prompt built from them

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterSpec {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub game_style: String,
    #[serde(default)]
    pub silhouette: String,
    #[serde(default)]
    pub color_palette: Vec<String>,
}

impl CharacterSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read character spec {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let spec: CharacterSpec = match ext.as_str() {
            "toml" => toml::from_str(&content)
                .with_context(|| format!("Invalid character spec {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Invalid character spec {}", path.display()))?,
            other => bail!(
                "Unsupported character spec format '{}'. Use a .toml or .json file",
                other
            ),
        };

        if spec.name.trim().is_empty() {
            bail!("Character spec {} has an empty name", path.display());
        }
        for (field, value) in [
            ("role", &spec.role),
            ("game_style", &spec.game_style),
            ("silhouette", &spec.silhouette),
        ] {
            if value.is_empty() {
                tracing::warn!(field, name = %spec.name, "character spec field is empty");
            }
        }
        Ok(spec)
    }

    /// Geometry-focused prompt for the 3D service
    pub fn to_prompt(&self) -> String {
        format!(
            "3D model of {}, {}. Style: {}. Silhouette: {}. Colors: {}.",
            self.name,
            self.role,
            self.game_style,
            self.silhouette,
            self.color_palette.join(", ")
        )
    }
}
