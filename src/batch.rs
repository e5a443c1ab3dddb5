use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::api::types::{
    BatchGenerateRequest, BatchItem, BatchSlideInput, BatchStatus, SlideGenerateRequest,
};
use crate::api::{ApiClient, ApiError};
use crate::models::{AspectRatio, SlideStatus, ID};
use crate::store::{ProjectStore, SlidePatch};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("a batch generation is already running")]
    AlreadyRunning,
    #[error("{0}")]
    Validation(String),
    #[error("slide not found: {0}")]
    UnknownSlide(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Backend worker concurrency hint; never enforced client-side.
    pub max_workers: Option<u32>,
    /// How long a slide may stay `generating` with no result before the
    /// stale pass flips it to `error`.
    pub stale_after: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: Some(3),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// What one batch run did. Per-slide failures are reported here, never
/// escalated to an overall error unless the whole request failed.
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch_id: ID,
    pub total_slides: u32,
    pub successful: u32,
    pub failed: u32,
    pub total_time: f64,
    pub applied: usize,
    pub outstanding: usize,
    pub failures: Vec<(ID, String)>,
    pub persist_error: Option<String>,
}

#[derive(Debug)]
struct PendingBatch {
    batch_id: ID,
    outstanding: Vec<ID>,
    dispatched_at: Instant,
}

/// Fan-out image generation for every slide of the active project.
///
/// Two-phase: slides are optimistically marked `generating` before the
/// round-trip, then the response is merged per slide. A failed request
/// rolls the mark back entirely; a slide absent from the response stays
/// `generating` until a poll resolves it or the stale pass expires it.
pub struct BatchOrchestrator {
    client: ApiClient,
    store: Arc<ProjectStore>,
    config: BatchConfig,
    in_flight: AtomicBool,
    pending: Mutex<Option<PendingBatch>>,
}

impl BatchOrchestrator {
    pub fn new(client: ApiClient, store: Arc<ProjectStore>) -> Self {
        Self::with_config(client, store, BatchConfig::default())
    }

    pub fn with_config(client: ApiClient, store: Arc<ProjectStore>, config: BatchConfig) -> Self {
        Self {
            client,
            store,
            config,
            in_flight: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingBatch>> {
        self.pending.lock().expect("batch state lock poisoned")
    }

    /// True when an opened project should kick off generation on its own:
    /// a style is in effect and no slide has artwork yet.
    pub fn auto_generate_needed(&self) -> bool {
        let slides = self.store.slides();
        !slides.is_empty()
            && !self.store.style_prompt().trim().is_empty()
            && slides.iter().all(|s| s.image_url.is_none())
    }

    pub async fn run(&self, ratio: AspectRatio) -> Result<BatchOutcome, BatchError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(BatchError::AlreadyRunning);
        }
        let result = self.dispatch(ratio).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn dispatch(&self, ratio: AspectRatio) -> Result<BatchOutcome, BatchError> {
        let slides = self.store.slides();
        if slides.is_empty() {
            return Err(BatchError::Validation(
                "generate an outline before batch rendering".into(),
            ));
        }
        let style_prompt = self.store.style_prompt();
        if style_prompt.trim().is_empty() {
            return Err(BatchError::Validation(
                "select a template before batch rendering".into(),
            ));
        }

        let ids: Vec<ID> = slides.iter().map(|s| s.id.clone()).collect();
        let inputs: Vec<BatchSlideInput> = slides
            .iter()
            .map(|s| BatchSlideInput {
                id: s.id.clone(),
                page_num: s.page_num,
                slide_type: s.slide_type,
                title: s.title.clone(),
                content_text: s.content_text.clone(),
                visual_desc: s.visual_desc.clone(),
            })
            .collect();

        // Phase 1: optimistic mark before the round-trip.
        self.store.set_statuses(&ids, SlideStatus::Generating);

        let request = BatchGenerateRequest {
            slides: inputs,
            style_prompt,
            max_workers: self.config.max_workers,
            aspect_ratio: ratio.ratio_string(),
        };

        let result = match self.client.batch_generate(&request).await {
            Ok(result) => result,
            Err(e) => {
                // Phase 2, abort: the optimistic mark rolls back whole.
                self.store.set_statuses(&ids, SlideStatus::Pending);
                return Err(BatchError::Api(e));
            }
        };

        // Phase 2, merge: apply whatever came back. Slides absent from the
        // response keep their `generating` mark for poll/expiry.
        let (applied, failures) = self.apply_items(&result.results);
        let outstanding: Vec<ID> = ids.into_iter().filter(|id| !applied.contains(id)).collect();
        let outstanding_count = outstanding.len();
        *self.lock_pending() = if outstanding.is_empty() {
            None
        } else {
            Some(PendingBatch {
                batch_id: result.batch_id.clone(),
                outstanding,
                dispatched_at: Instant::now(),
            })
        };

        // Applied image results survive even if persisting does not.
        let persist_error = match self.store.save_project(&self.client).await {
            Ok(_) => None,
            Err(e) => {
                log::warn!("project save after batch failed: {}", e);
                Some(e.to_string())
            }
        };

        Ok(BatchOutcome {
            batch_id: result.batch_id,
            total_slides: result.total_slides,
            successful: result.successful,
            failed: result.failed,
            total_time: result.total_time,
            applied: applied.len(),
            outstanding: outstanding_count,
            failures,
            persist_error,
        })
    }

    fn apply_items(&self, items: &[BatchItem]) -> (Vec<ID>, Vec<(ID, String)>) {
        let mut applied = Vec::new();
        let mut failures = Vec::new();
        for item in items {
            let patch = SlidePatch {
                image_url: item.image_url.clone(),
                final_prompt: item.final_prompt.clone(),
                status: Some(item.status),
                ..Default::default()
            };
            if self.store.update_slide(&item.slide_id, patch) {
                applied.push(item.slide_id.clone());
                if item.status == SlideStatus::Error {
                    let message = item
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "generation failed".to_string());
                    failures.push((item.slide_id.clone(), message));
                }
            } else {
                log::warn!("batch result for unknown slide {}", item.slide_id);
            }
        }
        (applied, failures)
    }

    /// Poll the dispatched batch, merging any newly finished slides.
    /// Returns `None` when nothing is outstanding.
    pub async fn poll_status(&self) -> Result<Option<BatchStatus>, BatchError> {
        let batch_id = match &*self.lock_pending() {
            Some(pending) => pending.batch_id.clone(),
            None => return Ok(None),
        };

        let status = self.client.batch_status(&batch_id).await?;
        let (applied, _) = self.apply_items(&status.results);

        let mut pending = self.lock_pending();
        if let Some(state) = pending.as_mut() {
            if state.batch_id == batch_id {
                state.outstanding.retain(|id| !applied.contains(id));
                if state.outstanding.is_empty() {
                    *pending = None;
                }
            }
        }
        Ok(Some(status))
    }

    /// Expire slides that outlived the stale window while still
    /// `generating` with no result; they flip to `error` instead of
    /// hanging forever. Returns the ids flipped.
    pub fn expire_stale(&self) -> Vec<ID> {
        let expired = {
            let mut pending = self.lock_pending();
            match pending.as_ref() {
                Some(state) if state.dispatched_at.elapsed() >= self.config.stale_after => {
                    pending.take().map(|s| s.outstanding).unwrap_or_default()
                }
                _ => return Vec::new(),
            }
        };

        let slides = self.store.slides();
        let mut flipped = Vec::new();
        for id in expired {
            let still_generating = slides
                .iter()
                .any(|s| s.id == id && s.status == SlideStatus::Generating);
            if still_generating {
                self.store.update_slide(
                    &id,
                    SlidePatch {
                        status: Some(SlideStatus::Error),
                        ..Default::default()
                    },
                );
                flipped.push(id);
            }
        }
        flipped
    }

    /// Re-render one slide from its current visual description.
    pub async fn regenerate_slide(
        &self,
        slide_id: &str,
        ratio: AspectRatio,
    ) -> Result<(), BatchError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(BatchError::AlreadyRunning);
        }
        let result = self.regenerate_inner(slide_id, ratio).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn regenerate_inner(
        &self,
        slide_id: &str,
        ratio: AspectRatio,
    ) -> Result<(), BatchError> {
        let slide = self
            .store
            .slides()
            .into_iter()
            .find(|s| s.id == slide_id)
            .ok_or_else(|| BatchError::UnknownSlide(slide_id.to_string()))?;
        let style_prompt = self.store.style_prompt();
        if style_prompt.trim().is_empty() {
            return Err(BatchError::Validation(
                "select a template before rendering".into(),
            ));
        }

        self.store.update_slide(
            slide_id,
            SlidePatch {
                status: Some(SlideStatus::Generating),
                ..Default::default()
            },
        );

        let request = SlideGenerateRequest {
            style_prompt,
            visual_desc: slide.visual_desc,
            aspect_ratio: ratio.ratio_string(),
            page_num: Some(slide.page_num),
            title: Some(slide.title),
            content_text: Some(slide.content_text),
        };

        match self.client.generate_slide(&request).await {
            Ok(response) => {
                self.store.update_slide(
                    slide_id,
                    SlidePatch {
                        image_url: Some(response.image_url),
                        final_prompt: Some(response.final_prompt),
                        status: Some(response.status),
                        ..Default::default()
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.store.update_slide(
                    slide_id,
                    SlidePatch {
                        status: Some(SlideStatus::Pending),
                        ..Default::default()
                    },
                );
                Err(BatchError::Api(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SlideData, SlideType, Template};
    use mockito::Server;

    fn slide(id: &str, page_num: u32) -> SlideData {
        SlideData {
            id: id.to_string(),
            page_num,
            slide_type: SlideType::Content,
            title: format!("Slide {}", page_num),
            content_text: "body".into(),
            visual_desc: "scene".into(),
            final_prompt: None,
            image_url: None,
            status: SlideStatus::Pending,
        }
    }

    fn template() -> Template {
        Template {
            id: "t1".into(),
            name: "Minimal".into(),
            style_prompt: "flat minimal".into(),
            cover_image: None,
            vis_settings: None,
            default_aspect_ratio: None,
            custom_dimensions: None,
        }
    }

    fn seeded_store() -> Arc<ProjectStore> {
        let store = ProjectStore::new();
        store.set_current_template(Some(template()));
        store.set_slides(vec![slide("s1", 1), slide("s2", 2), slide("s3", 3)]);
        store
    }

    fn saved_record_body() -> &'static str {
        r#"{"id":"p-1","title":"Untitled project","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z","template_style_prompt":"flat minimal","slides":[]}"#
    }

    fn partial_batch_body() -> &'static str {
        r#"{
            "batch_id": "b-1",
            "total_slides": 3,
            "successful": 1,
            "failed": 1,
            "total_time": 4.2,
            "results": [
                {"slide_id":"s1","page_num":1,"title":"Slide 1","image_url":"/images/s1.png","final_prompt":"flat minimal, scene","status":"done","generation_time":2.0},
                {"slide_id":"s3","page_num":3,"title":"Slide 3","status":"error","error_message":"content policy"}
            ]
        }"#
    }

    #[tokio::test]
    async fn missing_results_stay_generating() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/slide/batch/generate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(partial_batch_body())
            .create_async()
            .await;
        server
            .mock("POST", "/projects/save")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(saved_record_body())
            .create_async()
            .await;

        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(ApiClient::new(server.url()), Arc::clone(&store));

        let outcome = orchestrator.run(AspectRatio::Wide16x9).await.unwrap();

        assert_eq!(outcome.batch_id, "b-1");
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.outstanding, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "s3");
        assert!(outcome.persist_error.is_none());

        let slides = store.slides();
        assert_eq!(slides[0].status, SlideStatus::Done);
        assert_eq!(slides[0].image_url.as_deref(), Some("/images/s1.png"));
        assert_eq!(slides[1].status, SlideStatus::Generating);
        assert!(slides[1].image_url.is_none());
        assert_eq!(slides[2].status, SlideStatus::Error);
    }

    #[tokio::test]
    async fn request_failure_rolls_back_to_pending() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/slide/batch/generate")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(ApiClient::new(server.url()), Arc::clone(&store));

        let error = orchestrator.run(AspectRatio::Wide16x9).await.unwrap_err();

        assert!(matches!(error, BatchError::Api(_)));
        let slides = store.slides();
        assert!(slides.iter().all(|s| s.status == SlideStatus::Pending));
    }

    #[tokio::test]
    async fn validation_happens_before_any_request() {
        let store = ProjectStore::new();
        let orchestrator =
            BatchOrchestrator::new(ApiClient::new("http://127.0.0.1:1"), Arc::clone(&store));

        let error = orchestrator.run(AspectRatio::Wide16x9).await.unwrap_err();
        assert!(matches!(error, BatchError::Validation(_)));

        // Slides without a selected style are rejected too.
        store.set_slides(vec![slide("s1", 1)]);
        let error = orchestrator.run(AspectRatio::Wide16x9).await.unwrap_err();
        assert!(matches!(error, BatchError::Validation(_)));
    }

    #[tokio::test]
    async fn poll_resolves_outstanding_slides() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/slide/batch/generate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(partial_batch_body())
            .create_async()
            .await;
        server
            .mock("POST", "/projects/save")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(saved_record_body())
            .create_async()
            .await;
        server
            .mock("POST", "/slide/batch/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "batch_id": "b-1",
                    "status": "completed",
                    "progress": 1.0,
                    "total_slides": 3,
                    "completed_slides": 3,
                    "successful": 2,
                    "failed": 1,
                    "results": [
                        {"slide_id":"s2","page_num":2,"title":"Slide 2","image_url":"/images/s2.png","final_prompt":"flat minimal, scene","status":"done","generation_time":6.5}
                    ]
                }"#,
            )
            .create_async()
            .await;

        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(ApiClient::new(server.url()), Arc::clone(&store));
        orchestrator.run(AspectRatio::Wide16x9).await.unwrap();

        let status = orchestrator.poll_status().await.unwrap().unwrap();
        assert_eq!(status.successful, 2);

        let slides = store.slides();
        assert_eq!(slides[1].status, SlideStatus::Done);
        assert_eq!(slides[1].image_url.as_deref(), Some("/images/s2.png"));

        // Nothing outstanding any more.
        assert!(orchestrator.poll_status().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_slides_expire_to_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/slide/batch/generate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(partial_batch_body())
            .create_async()
            .await;
        server
            .mock("POST", "/projects/save")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(saved_record_body())
            .create_async()
            .await;

        let store = seeded_store();
        let config = BatchConfig {
            stale_after: Duration::ZERO,
            ..Default::default()
        };
        let orchestrator =
            BatchOrchestrator::with_config(ApiClient::new(server.url()), Arc::clone(&store), config);
        orchestrator.run(AspectRatio::Wide16x9).await.unwrap();

        let flipped = orchestrator.expire_stale();

        assert_eq!(flipped, vec!["s2".to_string()]);
        let slides = store.slides();
        assert_eq!(slides[1].status, SlideStatus::Error);
        // Already-resolved slides are untouched.
        assert_eq!(slides[0].status, SlideStatus::Done);
    }

    #[tokio::test]
    async fn regenerate_reverts_on_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/slide/generate")
            .with_status(500)
            .with_body("image model offline")
            .create_async()
            .await;

        let store = seeded_store();
        let orchestrator = BatchOrchestrator::new(ApiClient::new(server.url()), Arc::clone(&store));

        let error = orchestrator
            .regenerate_slide("s2", AspectRatio::Wide16x9)
            .await
            .unwrap_err();

        assert!(matches!(error, BatchError::Api(_)));
        let slides = store.slides();
        assert_eq!(slides[1].status, SlideStatus::Pending);
    }

    #[tokio::test]
    async fn auto_generation_wanted_only_without_artwork() {
        let store = seeded_store();
        let orchestrator =
            BatchOrchestrator::new(ApiClient::new("http://127.0.0.1:1"), Arc::clone(&store));
        assert!(orchestrator.auto_generate_needed());

        store.update_slide(
            "s1",
            SlidePatch {
                image_url: Some("/images/s1.png".into()),
                ..Default::default()
            },
        );
        assert!(!orchestrator.auto_generate_needed());
    }
}
