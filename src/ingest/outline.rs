use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::types::{OutlineEvent, OutlineRequest};
use crate::api::ApiClient;
use crate::models::{new_id, SlideData, SlideStatus};
use crate::store::ProjectStore;

use super::{CancelSignal, IngestError, IngestState};

/// Pure fold of outline stream events into an ordered slide list. The
/// async plumbing lives in [`OutlineRunner`].
#[derive(Debug)]
pub struct OutlineIngest {
    state: IngestState,
    slides: Vec<SlideData>,
    progress_log: Vec<String>,
}

pub enum OutlineStep {
    Continue,
    Completed {
        slides: Vec<SlideData>,
        message: String,
    },
    Failed {
        message: String,
    },
}

impl OutlineIngest {
    pub fn new() -> Self {
        Self {
            state: IngestState::Idle,
            slides: Vec::new(),
            progress_log: Vec::new(),
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Accumulation so far. Preview only; nothing is committed until the
    /// terminal `complete` event.
    pub fn slides(&self) -> &[SlideData] {
        &self.slides
    }

    pub fn progress_log(&self) -> &[String] {
        &self.progress_log
    }

    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.progress_log)
    }

    pub fn apply(&mut self, event: OutlineEvent) -> OutlineStep {
        match event {
            OutlineEvent::Start { message } => {
                self.state = IngestState::Streaming;
                self.slides.clear();
                self.progress_log.clear();
                if !message.is_empty() {
                    self.progress_log.push(message);
                }
                OutlineStep::Continue
            }
            OutlineEvent::Progress { message } => {
                if !message.is_empty() {
                    self.progress_log.push(message);
                }
                OutlineStep::Continue
            }
            OutlineEvent::Slide { slide } => {
                self.state = IngestState::Streaming;
                // The only point slides come into existence: a fresh local
                // id, pending status. `page_num` is taken as delivered and
                // never renumbered.
                self.slides.push(SlideData {
                    id: new_id(),
                    page_num: slide.page_num,
                    slide_type: slide.slide_type,
                    title: slide.title,
                    content_text: slide.content_text,
                    visual_desc: slide.visual_desc,
                    final_prompt: None,
                    image_url: None,
                    status: SlideStatus::Pending,
                });
                OutlineStep::Continue
            }
            OutlineEvent::Complete { message } => {
                self.state = IngestState::Completed;
                OutlineStep::Completed {
                    slides: std::mem::take(&mut self.slides),
                    message,
                }
            }
            OutlineEvent::Error { message } => {
                self.state = IngestState::Failed;
                self.slides.clear();
                OutlineStep::Failed { message }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.state = IngestState::Cancelled;
        self.slides.clear();
    }

    pub fn fail(&mut self) {
        self.state = IngestState::Failed;
        self.slides.clear();
    }
}

#[derive(Debug)]
pub struct OutlineSummary {
    pub slide_count: usize,
    pub message: String,
    pub progress_log: Vec<String>,
    pub dropped_frames: u64,
}

/// Drives one outline generation at a time: opens the stream, folds every
/// event, and replaces the store's slide list only on `complete`. On
/// error, transport failure or cancellation the accumulation is discarded
/// and the store is left exactly as it was.
pub struct OutlineRunner {
    client: ApiClient,
    store: Arc<ProjectStore>,
    running: AtomicBool,
}

impl OutlineRunner {
    pub fn new(client: ApiClient, store: Arc<ProjectStore>) -> Self {
        Self {
            client,
            store,
            running: AtomicBool::new(false),
        }
    }

    pub async fn run(
        &self,
        request: OutlineRequest,
        cancel: CancelSignal,
    ) -> Result<OutlineSummary, IngestError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(IngestError::AlreadyRunning);
        }
        let result = self.drive(request, cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn drive(
        &self,
        request: OutlineRequest,
        mut cancel: CancelSignal,
    ) -> Result<OutlineSummary, IngestError> {
        let mut stream = self.client.generate_outline_stream(&request).await?;
        let mut machine = OutlineIngest::new();

        loop {
            // A cancel racing an arriving event must win: the event is
            // dropped, never applied.
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    machine.cancel();
                    return Err(IngestError::Cancelled);
                }
                event = stream.next_event() => event?,
            };

            let event = match event {
                Some(event) => event,
                None => {
                    machine.fail();
                    return Err(IngestError::Stream(
                        "stream ended before completion".into(),
                    ));
                }
            };

            match machine.apply(event) {
                OutlineStep::Continue => {}
                OutlineStep::Completed { slides, message } => {
                    let slide_count = slides.len();
                    self.store.set_slides(slides);
                    return Ok(OutlineSummary {
                        slide_count,
                        message,
                        progress_log: machine.take_log(),
                        dropped_frames: stream.dropped_frames(),
                    });
                }
                OutlineStep::Failed { message } => {
                    return Err(IngestError::Stream(message));
                }
            }
        }
    }
}
