use serde::{Deserialize, Serialize};

use crate::models::{SlideStatus, SlideType, Template, ID};

/// Skeleton slide carried by an outline `slide` event. Local ids are
/// assigned at ingestion, so the wire shape has none.
#[derive(Debug, Clone, Deserialize)]
pub struct OutlineSlide {
    pub page_num: u32,
    #[serde(rename = "type", default)]
    pub slide_type: SlideType,
    pub title: String,
    #[serde(default)]
    pub content_text: String,
    #[serde(default)]
    pub visual_desc: String,
}

/// Events on the outline generation stream. `start` comes first,
/// `complete`/`error` are terminal; `slide` and `progress` interleave.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutlineEvent {
    Start {
        #[serde(default)]
        message: String,
    },
    Progress {
        #[serde(default)]
        message: String,
    },
    Slide {
        slide: OutlineSlide,
    },
    Complete {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Events on the template style-analysis stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StyleEvent {
    Start {
        #[serde(default)]
        message: String,
        #[serde(default)]
        file_count: u32,
    },
    Progress {
        #[serde(default)]
        message: String,
    },
    ChunkStart {
        #[serde(default)]
        message: String,
    },
    Chunk {
        content: String,
    },
    Complete {
        #[serde(default)]
        message: String,
        #[serde(default)]
        style_prompt: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlineRequest {
    pub text: String,
    pub slide_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<ID>,
}

/// One reference image uploaded for style analysis.
#[derive(Debug, Clone)]
pub struct StyleImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlideGenerateRequest {
    pub style_prompt: String,
    pub visual_desc: String,
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlideGenerateResponse {
    pub image_url: String,
    pub final_prompt: String,
    #[serde(default)]
    pub revised_prompt: String,
    pub status: SlideStatus,
}

/// Projection of a slide submitted for batch generation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSlideInput {
    pub id: ID,
    pub page_num: u32,
    #[serde(rename = "type")]
    pub slide_type: SlideType,
    pub title: String,
    pub content_text: String,
    pub visual_desc: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchGenerateRequest {
    pub slides: Vec<BatchSlideInput>,
    pub style_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<u32>,
    pub aspect_ratio: String,
}

/// Per-slide outcome in a batch result. A submitted slide may be absent
/// from `results` entirely; that means still pending, not success.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    pub slide_id: ID,
    pub page_num: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub final_prompt: Option<String>,
    pub status: SlideStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub generation_time: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResult {
    pub batch_id: ID,
    pub total_slides: u32,
    pub successful: u32,
    pub failed: u32,
    pub total_time: f64,
    #[serde(default)]
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchRunState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchStatus {
    pub batch_id: ID,
    pub status: BatchRunState,
    pub progress: f64,
    pub total_slides: u32,
    pub completed_slides: u32,
    pub successful: u32,
    pub failed: u32,
    #[serde(default)]
    pub estimated_remaining_time: Option<f64>,
    #[serde(default)]
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusRequest {
    pub batch_id: ID,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateListResponse {
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSaveResponse {
    pub template: Template,
}

/// `Template` minus the server-issued id, for `/template/save`.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateDraft {
    pub name: String,
    pub style_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vis_settings: Option<crate::models::VisSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_dimensions: Option<crate::models::Dimensions>,
}

/// Active-project payload for the export endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<ID>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_style_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub slides: Vec<crate::models::SlideData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportRequest {
    pub project: ProjectPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// AI-service block of the backend runtime configuration. Written fields
/// are merged server-side, so everything is optional here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_chat_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_image_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_timeout_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestRequest {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response_time: Option<f64>,
}
