use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ID = String;

pub fn new_id() -> ID {
  Uuid::new_v4().to_string()
}

pub fn now_iso() -> String {
  // RFC3339-ish without nanos; good enough for sorting/display.
  let t = time::OffsetDateTime::now_utc();
  t.format(&time::format_description::well_known::Rfc3339)
    .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlideType {
  Cover,
  Content,
  Ending,
}

impl Default for SlideType {
  fn default() -> Self {
    SlideType::Content
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlideStatus {
  Pending,
  Generating,
  Done,
  Error,
}

impl Default for SlideStatus {
  fn default() -> Self {
    SlideStatus::Pending
  }
}

/// One slide of the active project. `page_num` is assigned once at outline
/// ingestion and never renumbered; `id` is unique within the project.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SlideData {
  pub id: ID,
  pub page_num: u32,
  #[serde(rename = "type")]
  pub slide_type: SlideType,
  pub title: String,
  pub content_text: String,
  pub visual_desc: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub final_prompt: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  #[serde(default)]
  pub status: SlideStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct VisSettings {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub primary_color: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub font: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
  pub width: u32,
  pub height: u32,
}

/// Reusable style descriptor applied to every slide in a project.
/// Immutable once created except via an explicit re-save.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Template {
  #[serde(default = "new_id")]
  pub id: ID,
  pub name: String,
  pub style_prompt: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cover_image: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub vis_settings: Option<VisSettings>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_aspect_ratio: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub custom_dimensions: Option<Dimensions>,
}

/// Wire shape of a persisted project.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectRecord {
  pub id: ID,
  pub title: String,
  pub created_at: String,
  pub updated_at: String,
  pub template_style_prompt: String,
  pub slides: Vec<SlideData>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub thumbnail_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectListItem {
  pub id: ID,
  pub title: String,
  pub updated_at: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub thumbnail_url: Option<String>,
}

pub const MIN_CUSTOM_DIMENSION: u32 = 100;
pub const MAX_CUSTOM_DIMENSION: u32 = 4096;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AspectRatioError {
  #[error(
    "custom dimensions must be between {MIN_CUSTOM_DIMENSION} and {MAX_CUSTOM_DIMENSION} pixels"
  )]
  OutOfRange,
}

/// Target proportion for generated slide imagery: a fixed preset with
/// standard pixel dimensions, or validated custom dimensions reduced to
/// their simplest ratio on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
  Wide16x9,
  Classic4x3,
  Square,
  Portrait9x16,
  Photo3x2,
  Ultrawide21x9,
  Custom { width: u32, height: u32 },
}

impl AspectRatio {
  pub fn custom(width: u32, height: u32) -> Result<Self, AspectRatioError> {
    let range = MIN_CUSTOM_DIMENSION..=MAX_CUSTOM_DIMENSION;
    if !range.contains(&width) || !range.contains(&height) {
      return Err(AspectRatioError::OutOfRange);
    }
    Ok(AspectRatio::Custom { width, height })
  }

  /// Preset lookup from its wire label ("16:9", "4:3", ...).
  pub fn from_label(label: &str) -> Option<Self> {
    match label {
      "16:9" => Some(AspectRatio::Wide16x9),
      "4:3" => Some(AspectRatio::Classic4x3),
      "1:1" => Some(AspectRatio::Square),
      "9:16" => Some(AspectRatio::Portrait9x16),
      "3:2" => Some(AspectRatio::Photo3x2),
      "21:9" => Some(AspectRatio::Ultrawide21x9),
      _ => None,
    }
  }

  pub fn dimensions(&self) -> Dimensions {
    let (width, height) = match *self {
      AspectRatio::Wide16x9 => (1920, 1080),
      AspectRatio::Classic4x3 => (1024, 768),
      AspectRatio::Square => (1080, 1080),
      AspectRatio::Portrait9x16 => (1080, 1920),
      AspectRatio::Photo3x2 => (1800, 1200),
      AspectRatio::Ultrawide21x9 => (2560, 1080),
      AspectRatio::Custom { width, height } => (width, height),
    };
    Dimensions { width, height }
  }

  /// Ratio string sent to the backend, e.g. 1920x1080 -> "16:9".
  pub fn ratio_string(&self) -> String {
    let Dimensions { width, height } = self.dimensions();
    let divisor = gcd(width, height);
    format!("{}:{}", width / divisor, height / divisor)
  }
}

impl Default for AspectRatio {
  fn default() -> Self {
    AspectRatio::Wide16x9
  }
}

fn gcd(a: u32, b: u32) -> u32 {
  if b == 0 {
    a
  } else {
    gcd(b, a % b)
  }
}
