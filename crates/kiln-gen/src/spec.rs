//! Job specification: what to generate and with which options
//!
//! A `GenerationJobSpec` is validated once, before any network call. The
//! orchestrator then turns it into a `ResolvedJobSpec` (every image replaced
//! by a URL), which is the only shape providers ever see.

use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const MIN_FACE_COUNT: u32 = 40_000;
pub const MAX_FACE_COUNT: u32 = 1_500_000;
pub const DEFAULT_FACE_COUNT: u32 = 500_000;

/// Camera view an input image was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewTag {
    Front,
    Left,
    Right,
    Back,
}

impl ViewTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewTag::Front => "front",
            ViewTag::Left => "left",
            ViewTag::Right => "right",
            ViewTag::Back => "back",
        }
    }
}

impl fmt::Display for ViewTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewTag {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(ViewTag::Front),
            "left" => Ok(ViewTag::Left),
            "right" => Ok(ViewTag::Right),
            "back" => Ok(ViewTag::Back),
            _ => Err(KilnError::Validation(format!(
                "Invalid view '{}'. Valid options: front, left, right, back",
                s
            ))),
        }
    }
}

/// Generation mode offered by the 3D service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenerateType {
    #[default]
    Normal,
    LowPoly,
    Geometry,
    Sketch,
}

impl GenerateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerateType::Normal => "Normal",
            GenerateType::LowPoly => "LowPoly",
            GenerateType::Geometry => "Geometry",
            GenerateType::Sketch => "Sketch",
        }
    }
}

impl fmt::Display for GenerateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerateType {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(GenerateType::Normal),
            "lowpoly" => Ok(GenerateType::LowPoly),
            "geometry" => Ok(GenerateType::Geometry),
            "sketch" => Ok(GenerateType::Sketch),
            _ => Err(KilnError::Validation(format!(
                "Invalid generate type '{}'. Valid options: Normal, LowPoly, Geometry, Sketch",
                s
            ))),
        }
    }
}

/// Polygon topology for LowPoly generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolygonType {
    Triangle,
    Quadrilateral,
}

impl PolygonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolygonType::Triangle => "triangle",
            PolygonType::Quadrilateral => "quadrilateral",
        }
    }
}

impl fmt::Display for PolygonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolygonType {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "triangle" => Ok(PolygonType::Triangle),
            "quadrilateral" => Ok(PolygonType::Quadrilateral),
            _ => Err(KilnError::Validation(format!(
                "Invalid polygon type '{}'. Valid options: triangle, quadrilateral",
                s
            ))),
        }
    }
}

/// Options sent with every generation job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub enable_pbr: bool,
    #[serde(default = "default_face_count")]
    pub face_count: u32,
    #[serde(default)]
    pub generate_type: GenerateType,
    /// Only meaningful for `GenerateType::LowPoly`
    #[serde(default)]
    pub polygon_type: Option<PolygonType>,
}

fn default_face_count() -> u32 {
    DEFAULT_FACE_COUNT
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            enable_pbr: false,
            face_count: DEFAULT_FACE_COUNT,
            generate_type: GenerateType::Normal,
            polygon_type: None,
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_FACE_COUNT..=MAX_FACE_COUNT).contains(&self.face_count) {
            return Err(KilnError::Validation(format!(
                "face_count must be between {} and {}, got {}",
                MIN_FACE_COUNT, MAX_FACE_COUNT, self.face_count
            )));
        }
        if self.polygon_type.is_some() && self.generate_type != GenerateType::LowPoly {
            return Err(KilnError::Validation(format!(
                "polygon_type is only supported with LowPoly generation, not {}",
                self.generate_type
            )));
        }
        Ok(())
    }
}

/// Where an input image comes from
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Local content that must be uploaded before submission
    Bytes {
        data: Vec<u8>,
        content_type: String,
        file_name: String,
    },
    /// Already publicly reachable
    Url(String),
}

impl ImageSource {
    /// Read a local image file
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(ImageSource::Bytes {
            data,
            content_type: content_type_for(path).to_string(),
            file_name,
        })
    }

    pub fn is_url(&self) -> bool {
        matches!(self, ImageSource::Url(_))
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Bytes {
                data,
                content_type,
                file_name,
            } => f
                .debug_struct("Bytes")
                .field("file_name", file_name)
                .field("content_type", content_type)
                .field("len", &data.len())
                .finish(),
            ImageSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Guess a MIME type from a file extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// One input image tagged with its view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewImage {
    pub view: ViewTag,
    pub source: ImageSource,
}

impl ViewImage {
    pub fn new(view: ViewTag, source: ImageSource) -> Self {
        Self { view, source }
    }
}

/// Caller-supplied description of what to generate
#[derive(Debug, Clone, Default)]
pub struct GenerationJobSpec {
    pub prompt: Option<String>,
    pub images: Vec<ViewImage>,
    pub options: GenerationOptions,
}

impl GenerationJobSpec {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn from_images(images: Vec<ViewImage>) -> Self {
        Self {
            images,
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the prompt/images invariant and the options.
    pub fn validate(&self) -> Result<()> {
        if let Some(prompt) = &self.prompt {
            if prompt.trim().is_empty() {
                return Err(KilnError::Validation("prompt is empty".to_string()));
            }
        }

        if self.prompt.is_none() && self.images.is_empty() {
            return Err(KilnError::Validation(
                "job needs a prompt or at least one image".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for image in &self.images {
            if !seen.insert(image.view) {
                return Err(KilnError::Validation(format!(
                    "duplicate {} view image",
                    image.view
                )));
            }
            match &image.source {
                ImageSource::Url(url) => {
                    if !(url.starts_with("https://") || url.starts_with("http://")) {
                        return Err(KilnError::Validation(format!(
                            "{} view URL must be http(s): {}",
                            image.view, url
                        )));
                    }
                }
                ImageSource::Bytes { data, .. } => {
                    if data.is_empty() {
                        return Err(KilnError::Validation(format!(
                            "{} view image is empty",
                            image.view
                        )));
                    }
                }
            }
        }

        if !self.images.is_empty() && !seen.contains(&ViewTag::Front) {
            return Err(KilnError::Validation(
                "left/right/back views require a front view image".to_string(),
            ));
        }

        if self.prompt.is_some()
            && !self.images.is_empty()
            && self.options.generate_type != GenerateType::Sketch
        {
            return Err(KilnError::Validation(
                "a prompt and images can only be combined in Sketch mode".to_string(),
            ));
        }

        self.options.validate()
    }

    /// Number of images that still need uploading
    pub fn local_image_count(&self) -> usize {
        self.images.iter().filter(|i| !i.source.is_url()).count()
    }
}

/// A side view resolved to a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedView {
    pub view: ViewTag,
    pub image_url: String,
}

/// A validated job spec whose images are all remote URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedJobSpec {
    pub prompt: Option<String>,
    pub front_image_url: Option<String>,
    pub multi_view: Vec<ResolvedView>,
    pub options: GenerationOptions,
}

impl ResolvedJobSpec {
    /// Short description of the inputs for manifests and logs
    pub fn summary(&self) -> InputSummary {
        let input_type = match (&self.prompt, &self.front_image_url) {
            (Some(_), Some(_)) => "sketch",
            (Some(_), None) => "prompt",
            (None, Some(_)) if !self.multi_view.is_empty() => "multi_view",
            (None, _) => "image_url",
        };
        InputSummary {
            input_type: input_type.to_string(),
            prompt: self.prompt.clone(),
            front_image_url: self.front_image_url.clone(),
            views: self.multi_view.clone(),
        }
    }
}

/// Input summary persisted in the job manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSummary {
    pub input_type: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub front_image_url: Option<String>,
    #[serde(default)]
    pub views: Vec<ResolvedView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(u: &str) -> ImageSource {
        ImageSource::Url(u.to_string())
    }

    fn bytes(name: &str) -> ImageSource {
        ImageSource::Bytes {
            data: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".to_string(),
            file_name: name.to_string(),
        }
    }

    #[test]
    fn test_prompt_only_is_valid() {
        assert!(GenerationJobSpec::from_prompt("a stone golem").validate().is_ok());
    }

    #[test]
    fn test_front_image_only_is_valid() {
        let spec = GenerationJobSpec::from_images(vec![ViewImage::new(
            ViewTag::Front,
            url("https://cdn.example.com/front.png"),
        )]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_empty_spec_rejected() {
        let err = GenerationJobSpec::default().validate().unwrap_err();
        assert!(matches!(err, KilnError::Validation(_)));
    }

    #[test]
    fn test_blank_prompt_rejected() {
        let err = GenerationJobSpec::from_prompt("   ").validate().unwrap_err();
        assert!(matches!(err, KilnError::Validation(_)));
    }

    #[test]
    fn test_side_views_need_front() {
        let spec = GenerationJobSpec::from_images(vec![ViewImage::new(ViewTag::Left, bytes("left.png"))]);
        assert!(matches!(spec.validate(), Err(KilnError::Validation(_))));
    }

    #[test]
    fn test_duplicate_views_rejected() {
        let spec = GenerationJobSpec::from_images(vec![
            ViewImage::new(ViewTag::Front, bytes("a.png")),
            ViewImage::new(ViewTag::Front, bytes("b.png")),
        ]);
        assert!(matches!(spec.validate(), Err(KilnError::Validation(_))));
    }

    #[test]
    fn test_prompt_with_images_only_in_sketch_mode() {
        let mut spec = GenerationJobSpec::from_prompt("a knight");
        spec.images
            .push(ViewImage::new(ViewTag::Front, url("https://cdn.example.com/sketch.png")));
        assert!(spec.validate().is_err());

        spec.options.generate_type = GenerateType::Sketch;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_face_count_bounds() {
        let mut options = GenerationOptions::default();
        options.face_count = MIN_FACE_COUNT;
        assert!(options.validate().is_ok());
        options.face_count = MAX_FACE_COUNT;
        assert!(options.validate().is_ok());
        options.face_count = MIN_FACE_COUNT - 1;
        assert!(options.validate().is_err());
        options.face_count = MAX_FACE_COUNT + 1;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_polygon_type_requires_lowpoly() {
        let mut options = GenerationOptions {
            polygon_type: Some(PolygonType::Quadrilateral),
            ..Default::default()
        };
        assert!(options.validate().is_err());
        options.generate_type = GenerateType::LowPoly;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_non_http_url_rejected() {
        let spec = GenerationJobSpec::from_images(vec![ViewImage::new(
            ViewTag::Front,
            url("file:///tmp/front.png"),
        )]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("lowpoly".parse::<GenerateType>().unwrap(), GenerateType::LowPoly);
        assert_eq!("Sketch".parse::<GenerateType>().unwrap(), GenerateType::Sketch);
        assert_eq!("BACK".parse::<ViewTag>().unwrap(), ViewTag::Back);
        assert!("top".parse::<ViewTag>().is_err());
        assert!("hexagon".parse::<PolygonType>().is_err());
    }

    #[test]
    fn test_options_wire_names() {
        let json = serde_json::to_value(GenerationOptions {
            generate_type: GenerateType::LowPoly,
            polygon_type: Some(PolygonType::Triangle),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["generate_type"], "LowPoly");
        assert_eq!(json["polygon_type"], "triangle");
    }

    #[test]
    fn test_summary_input_types() {
        let mut resolved = ResolvedJobSpec {
            prompt: None,
            front_image_url: Some("https://cdn.example.com/f.png".to_string()),
            multi_view: vec![],
            options: GenerationOptions::default(),
        };
        assert_eq!(resolved.summary().input_type, "image_url");

        resolved.multi_view.push(ResolvedView {
            view: ViewTag::Back,
            image_url: "https://cdn.example.com/b.png".to_string(),
        });
        assert_eq!(resolved.summary().input_type, "multi_view");

        resolved.prompt = Some("outline".to_string());
        assert_eq!(resolved.summary().input_type, "sketch");
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(content_type_for(Path::new("front.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("side.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }
}
