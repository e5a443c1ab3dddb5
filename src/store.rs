use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::api::types::ProjectPayload;
use crate::api::{ApiClient, ApiError};
use crate::models::{new_id, now_iso, ProjectRecord, SlideData, SlideStatus, Template, ID};

/// Quiescence window after the last qualifying edit before an auto-save
/// fires. The unsaved-changes guard uses the same window.
pub const AUTOSAVE_QUIESCENCE: Duration = Duration::from_millis(2500);

const DEFAULT_TITLE: &str = "Untitled project";

/// Partial update for one slide. Only the populated fields are written;
/// editing `visual_desc` alone never touches `status`.
#[derive(Debug, Default, Clone)]
pub struct SlidePatch {
    pub title: Option<String>,
    pub content_text: Option<String>,
    pub visual_desc: Option<String>,
    pub final_prompt: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<SlideStatus>,
}

#[derive(Debug)]
struct ProjectInner {
    templates: Vec<Template>,
    current_template: Option<Template>,
    template_style_prompt: String,
    slides: Vec<SlideData>,
    current_slide_id: Option<ID>,
    project_id: Option<ID>,
    title: String,
    created_at: Option<String>,
    updated_at: Option<String>,
    thumbnail_url: Option<String>,
    dirty: bool,
    version: u64,
    last_edit_at: Option<Instant>,
}

impl ProjectInner {
    fn blank() -> Self {
        Self {
            templates: Vec::new(),
            current_template: None,
            template_style_prompt: String::new(),
            slides: Vec::new(),
            current_slide_id: None,
            project_id: None,
            title: DEFAULT_TITLE.to_string(),
            created_at: None,
            updated_at: None,
            thumbnail_url: None,
            dirty: false,
            version: 0,
            last_edit_at: None,
        }
    }

    fn mark_edit(&mut self) {
        self.dirty = true;
        self.version = self.version.wrapping_add(1);
        self.last_edit_at = Some(Instant::now());
    }

    fn style_prompt(&self) -> String {
        match &self.current_template {
            Some(template) => template.style_prompt.clone(),
            None => self.template_style_prompt.clone(),
        }
    }
}

struct AutosaveState {
    client: Option<ApiClient>,
    delay: Duration,
    task: Option<JoinHandle<()>>,
    me: Weak<ProjectStore>,
}

impl Default for AutosaveState {
    fn default() -> Self {
        Self {
            client: None,
            delay: AUTOSAVE_QUIESCENCE,
            task: None,
            me: Weak::new(),
        }
    }
}

/// State container for the active project and the template catalog.
///
/// Explicitly constructed and handed to whoever composes the UI; every
/// mutation goes through a declared operation here and is a single atomic
/// step under one lock. The lock is never held across an await.
pub struct ProjectStore {
    inner: Mutex<ProjectInner>,
    autosave: Mutex<AutosaveState>,
}

impl ProjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ProjectInner::blank()),
            autosave: Mutex::new(AutosaveState::default()),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, ProjectInner> {
        self.inner.lock().expect("project store lock poisoned")
    }

    // --- template catalog ---

    pub fn set_templates(&self, templates: Vec<Template>) {
        self.lock_inner().templates = templates;
    }

    pub fn add_template(&self, template: Template) {
        self.lock_inner().templates.push(template);
    }

    pub fn templates(&self) -> Vec<Template> {
        self.lock_inner().templates.clone()
    }

    /// Select the template applied to the active project.
    pub fn set_current_template(&self, template: Option<Template>) {
        {
            let mut inner = self.lock_inner();
            inner.template_style_prompt = template
                .as_ref()
                .map(|t| t.style_prompt.clone())
                .unwrap_or_default();
            inner.current_template = template;
            inner.mark_edit();
        }
        self.arm_autosave();
    }

    pub fn current_template(&self) -> Option<Template> {
        self.lock_inner().current_template.clone()
    }

    /// Style prompt in effect: the current template's, or the prompt a
    /// loaded project was saved with.
    pub fn style_prompt(&self) -> String {
        self.lock_inner().style_prompt()
    }

    // --- slides ---

    /// Replace the slide list wholesale; the first slide becomes current.
    pub fn set_slides(&self, slides: Vec<SlideData>) {
        {
            let mut inner = self.lock_inner();
            inner.current_slide_id = slides.first().map(|s| s.id.clone());
            inner.slides = slides;
            inner.mark_edit();
        }
        self.arm_autosave();
    }

    pub fn append_slides(&self, slides: Vec<SlideData>) {
        {
            let mut inner = self.lock_inner();
            inner.slides.extend(slides);
            if inner.current_slide_id.is_none() {
                inner.current_slide_id = inner.slides.first().map(|s| s.id.clone());
            }
            inner.mark_edit();
        }
        self.arm_autosave();
    }

    pub fn slides(&self) -> Vec<SlideData> {
        self.lock_inner().slides.clone()
    }

    /// Select which slide the UI shows; selection is view state, not an
    /// edit, so it does not arm the auto-save timer.
    pub fn select_slide(&self, id: Option<&str>) {
        let mut inner = self.lock_inner();
        inner.current_slide_id = match id {
            Some(id) if inner.slides.iter().any(|s| s.id == id) => Some(id.to_string()),
            _ => None,
        };
    }

    pub fn current_slide(&self) -> Option<SlideData> {
        let inner = self.lock_inner();
        let id = inner.current_slide_id.as_deref()?;
        inner.slides.iter().find(|s| s.id == id).cloned()
    }

    pub fn update_slide(&self, id: &str, patch: SlidePatch) -> bool {
        let found = {
            let mut inner = self.lock_inner();
            match inner.slides.iter_mut().find(|s| s.id == id) {
                Some(slide) => {
                    if let Some(title) = patch.title {
                        slide.title = title;
                    }
                    if let Some(content_text) = patch.content_text {
                        slide.content_text = content_text;
                    }
                    if let Some(visual_desc) = patch.visual_desc {
                        slide.visual_desc = visual_desc;
                    }
                    if let Some(final_prompt) = patch.final_prompt {
                        slide.final_prompt = Some(final_prompt);
                    }
                    if let Some(image_url) = patch.image_url {
                        slide.image_url = Some(image_url);
                    }
                    if let Some(status) = patch.status {
                        slide.status = status;
                    }
                    inner.mark_edit();
                    true
                }
                None => false,
            }
        };
        if found {
            self.arm_autosave();
        }
        found
    }

    /// Bulk status transition for the given slide ids.
    pub fn set_statuses(&self, ids: &[ID], status: SlideStatus) {
        {
            let mut inner = self.lock_inner();
            for slide in inner.slides.iter_mut() {
                if ids.contains(&slide.id) {
                    slide.status = status;
                }
            }
            inner.mark_edit();
        }
        self.arm_autosave();
    }

    // --- project ---

    pub fn set_title(&self, title: String) {
        {
            let mut inner = self.lock_inner();
            inner.title = if title.trim().is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                title
            };
            inner.mark_edit();
        }
        self.arm_autosave();
    }

    pub fn title(&self) -> String {
        self.lock_inner().title.clone()
    }

    pub fn project_id(&self) -> Option<ID> {
        self.lock_inner().project_id.clone()
    }

    pub fn updated_at(&self) -> Option<String> {
        self.lock_inner().updated_at.clone()
    }

    /// Replace all active state with a loaded project.
    pub fn load_project(&self, record: ProjectRecord) {
        let mut inner = self.lock_inner();
        inner.project_id = Some(record.id);
        inner.title = record.title;
        inner.created_at = Some(record.created_at);
        inner.updated_at = Some(record.updated_at);
        inner.template_style_prompt = record.template_style_prompt;
        inner.current_template = None;
        inner.current_slide_id = record.slides.first().map(|s| s.id.clone());
        inner.slides = record.slides;
        inner.thumbnail_url = record.thumbnail_url;
        inner.dirty = false;
        inner.version = inner.version.wrapping_add(1);
        inner.last_edit_at = None;
    }

    /// Reset to a blank new project. The template catalog survives.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        let templates = std::mem::take(&mut inner.templates);
        *inner = ProjectInner::blank();
        inner.templates = templates;
    }

    /// True when a qualifying edit has not yet reached the backend; the
    /// page-unload guard keys off this.
    pub fn has_unsaved_changes(&self) -> bool {
        self.lock_inner().dirty
    }

    /// True when a qualifying edit happened within the given window, i.e.
    /// an auto-save may still be pending.
    pub fn edited_within(&self, window: Duration) -> bool {
        self.lock_inner()
            .last_edit_at
            .map(|at| at.elapsed() <= window)
            .unwrap_or(false)
    }

    pub fn project_payload(&self) -> ProjectPayload {
        let inner = self.lock_inner();
        let style_prompt = inner.style_prompt();
        ProjectPayload {
            template_id: inner.current_template.as_ref().map(|t| t.id.clone()),
            template_style_prompt: if style_prompt.is_empty() {
                None
            } else {
                Some(style_prompt)
            },
            title: Some(inner.title.clone()),
            slides: inner.slides.clone(),
        }
    }

    /// Persist the active project. Assigns an id on first save, refreshes
    /// `updated_at` on every call issued, and returns the id. Edits that
    /// land while the request is in flight keep the store dirty.
    pub async fn save_project(&self, client: &ApiClient) -> Result<ID, ApiError> {
        let (record, version) = {
            let mut inner = self.lock_inner();
            let id = inner.project_id.clone().unwrap_or_else(new_id);
            let now = now_iso();
            let created_at = inner.created_at.clone().unwrap_or_else(|| now.clone());
            inner.updated_at = Some(now.clone());
            let thumbnail_url = inner
                .thumbnail_url
                .clone()
                .or_else(|| inner.slides.iter().find_map(|s| s.image_url.clone()));
            let record = ProjectRecord {
                id,
                title: inner.title.clone(),
                created_at,
                updated_at: now,
                template_style_prompt: inner.style_prompt(),
                slides: inner.slides.clone(),
                thumbnail_url,
            };
            (record, inner.version)
        };

        let saved = client.save_project(&record).await?;

        let mut inner = self.lock_inner();
        inner.project_id = Some(saved.id.clone());
        inner.created_at = Some(saved.created_at);
        if inner.version == version {
            inner.dirty = false;
        }
        Ok(saved.id)
    }

    // --- auto-save ---

    /// Arm auto-saving through the given client. Must be called on the
    /// owning `Arc` so the timer task can reach the store.
    pub fn enable_autosave(self: &Arc<Self>, client: ApiClient, delay: Duration) {
        let mut state = self.lock_autosave();
        state.client = Some(client);
        state.delay = delay;
        state.me = Arc::downgrade(self);
    }

    pub fn disable_autosave(&self) {
        let mut state = self.lock_autosave();
        state.client = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    fn lock_autosave(&self) -> MutexGuard<'_, AutosaveState> {
        self.autosave.lock().expect("autosave lock poisoned")
    }

    /// (Re-)arm the quiescence timer. Only one timer is live at a time;
    /// re-arming replaces the previous one.
    fn arm_autosave(&self) {
        let mut state = self.lock_autosave();
        let (client, store) = match (&state.client, state.me.upgrade()) {
            (Some(client), Some(store)) => (client.clone(), store),
            _ => return,
        };
        if let Some(task) = state.task.take() {
            task.abort();
        }
        let delay = state.delay;
        state.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = store.save_project(&client).await {
                log::warn!("auto-save failed: {}", e);
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SlideType;
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

    fn saved_record_body(id: &str) -> String {
        format!(
            r#"{{"id":"{}","title":"Untitled project","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z","template_style_prompt":"","slides":[]}}"#,
            id
        )
    }

    #[test]
    fn set_slides_selects_the_first() {
        let store = ProjectStore::new();
        store.set_slides(vec![slide("a", 1), slide("b", 2)]);
        assert_eq!(store.current_slide().unwrap().id, "a");

        store.select_slide(Some("b"));
        assert_eq!(store.current_slide().unwrap().id, "b");

        store.select_slide(Some("missing"));
        assert!(store.current_slide().is_none());
    }

    #[test]
    fn visual_desc_edit_leaves_status_alone() {
        let store = ProjectStore::new();
        store.set_slides(vec![slide("a", 1)]);
        store.update_slide(
            "a",
            SlidePatch {
                visual_desc: Some("a darker skyline".into()),
                ..Default::default()
            },
        );
        let slide = store.current_slide().unwrap();
        assert_eq!(slide.visual_desc, "a darker skyline");
        assert_eq!(slide.status, SlideStatus::Pending);
    }

    #[test]
    fn load_project_replaces_state_without_marking_dirty() {
        let store = ProjectStore::new();
        store.set_title("scratch".into());
        assert!(store.has_unsaved_changes());

        store.load_project(ProjectRecord {
            id: "p-9".into(),
            title: "Quarterly review".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-02T00:00:00Z".into(),
            template_style_prompt: "flat pastel".into(),
            slides: vec![slide("a", 1)],
            thumbnail_url: None,
        });

        assert!(!store.has_unsaved_changes());
        assert_eq!(store.title(), "Quarterly review");
        assert_eq!(store.project_id().as_deref(), Some("p-9"));
        assert_eq!(store.style_prompt(), "flat pastel");
        assert_eq!(store.current_slide().unwrap().id, "a");
    }

    #[test]
    fn reset_keeps_the_template_catalog() {
        let store = ProjectStore::new();
        store.set_templates(vec![Template {
            id: "t1".into(),
            name: "Minimal".into(),
            style_prompt: "flat".into(),
            cover_image: None,
            vis_settings: None,
            default_aspect_ratio: None,
            custom_dimensions: None,
        }]);
        store.set_slides(vec![slide("a", 1)]);
        store.reset();

        assert!(store.slides().is_empty());
        assert_eq!(store.title(), "Untitled project");
        assert!(!store.has_unsaved_changes());
        assert_eq!(store.templates().len(), 1);
    }

    #[tokio::test]
    async fn saving_twice_is_idempotent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/save")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(saved_record_body("p-1"))
            .expect(2)
            .create_async()
            .await;

        let client = ApiClient::new(server.url());
        let store = ProjectStore::new();
        store.set_slides(vec![slide("a", 1)]);

        let first_id = store.save_project(&client).await.unwrap();
        let first_updated = store.updated_at().unwrap();
        assert!(!store.has_unsaved_changes());

        let second_id = store.save_project(&client).await.unwrap();
        let second_updated = store.updated_at().unwrap();

        mock.assert_async().await;
        assert_eq!(first_id, "p-1");
        assert_eq!(second_id, first_id);
        assert!(second_updated >= first_updated);
    }

    #[tokio::test]
    async fn save_failure_keeps_the_store_dirty() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/projects/save")
            .with_status(500)
            .with_body("backend exploded")
            .create_async()
            .await;

        let client = ApiClient::new(server.url());
        let store = ProjectStore::new();
        store.set_slides(vec![slide("a", 1)]);

        assert!(store.save_project(&client).await.is_err());
        assert!(store.has_unsaved_changes());
    }

    #[tokio::test]
    async fn rapid_edits_collapse_into_one_autosave() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/save")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(saved_record_body("p-2"))
            .expect(1)
            .create_async()
            .await;

        let client = ApiClient::new(server.url());
        let store = ProjectStore::new();
        store.enable_autosave(client, Duration::from_millis(100));

        store.set_slides(vec![slide("a", 1)]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.update_slide(
            "a",
            SlidePatch {
                title: Some("retitled".into()),
                ..Default::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        mock.assert_async().await;
        assert!(!store.has_unsaved_changes());
        assert_eq!(store.project_id().as_deref(), Some("p-2"));
    }
}
