use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::api::types::{StyleEvent, StyleImage};
use crate::api::ApiClient;

use super::{CancelSignal, IngestError, IngestState};

/// Pure fold of style-analysis stream events into an accumulating prompt
/// text. A terminal `complete` carrying a non-empty `style_prompt`
/// supersedes the accumulation; otherwise the joined chunks stand.
#[derive(Debug)]
pub struct StyleIngest {
    state: IngestState,
    buffer: String,
    progress_log: Vec<String>,
    file_count: u32,
}

pub enum StyleStep {
    Continue,
    Completed {
        style_prompt: String,
        message: String,
    },
    Failed {
        message: String,
    },
}

impl StyleIngest {
    pub fn new() -> Self {
        Self {
            state: IngestState::Idle,
            buffer: String::new(),
            progress_log: Vec::new(),
            file_count: 0,
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// In-progress text. Unlike the outline fold this is meant to be shown
    /// (and edited) live, since the destination is a single text field.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.progress_log)
    }

    pub fn apply(&mut self, event: StyleEvent) -> StyleStep {
        match event {
            StyleEvent::Start {
                message,
                file_count,
            } => {
                self.state = IngestState::Streaming;
                self.buffer.clear();
                self.progress_log.clear();
                self.file_count = file_count;
                if !message.is_empty() {
                    self.progress_log.push(message);
                }
                StyleStep::Continue
            }
            StyleEvent::Progress { message } | StyleEvent::ChunkStart { message } => {
                if !message.is_empty() {
                    self.progress_log.push(message);
                }
                StyleStep::Continue
            }
            StyleEvent::Chunk { content } => {
                self.state = IngestState::Streaming;
                self.buffer.push_str(&content);
                self.buffer.push('\n');
                StyleStep::Continue
            }
            StyleEvent::Complete {
                message,
                style_prompt,
            } => {
                self.state = IngestState::Completed;
                let style_prompt = match style_prompt {
                    Some(prompt) if !prompt.trim().is_empty() => prompt,
                    _ => std::mem::take(&mut self.buffer),
                };
                StyleStep::Completed {
                    style_prompt,
                    message,
                }
            }
            StyleEvent::Error { message } => {
                self.state = IngestState::Failed;
                self.buffer.clear();
                StyleStep::Failed { message }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.state = IngestState::Cancelled;
        self.buffer.clear();
    }

    pub fn fail(&mut self) {
        self.state = IngestState::Failed;
        self.buffer.clear();
    }
}

#[derive(Debug)]
pub struct StyleSummary {
    pub style_prompt: String,
    pub message: String,
    pub file_count: u32,
    pub progress_log: Vec<String>,
    pub dropped_frames: u64,
}

/// Drives one style analysis at a time over the uploaded reference images,
/// publishing the partial text on a watch channel as it grows.
pub struct StyleRunner {
    client: ApiClient,
    running: AtomicBool,
    preview: watch::Sender<String>,
}

impl StyleRunner {
    pub fn new(client: ApiClient) -> Self {
        let (preview, _) = watch::channel(String::new());
        Self {
            client,
            running: AtomicBool::new(false),
            preview,
        }
    }

    /// Live view of the accumulating style text.
    pub fn subscribe_preview(&self) -> watch::Receiver<String> {
        self.preview.subscribe()
    }

    pub async fn run(
        &self,
        files: Vec<StyleImage>,
        cancel: CancelSignal,
    ) -> Result<StyleSummary, IngestError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(IngestError::AlreadyRunning);
        }
        let result = self.drive(files, cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn drive(
        &self,
        files: Vec<StyleImage>,
        mut cancel: CancelSignal,
    ) -> Result<StyleSummary, IngestError> {
        let mut stream = self.client.analyze_template_stream(files).await?;
        let mut machine = StyleIngest::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    machine.cancel();
                    let _ = self.preview.send(String::new());
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
                StyleStep::Continue => {
                    let _ = self.preview.send(machine.text().to_string());
                }
                StyleStep::Completed {
                    style_prompt,
                    message,
                } => {
                    let _ = self.preview.send(style_prompt.clone());
                    return Ok(StyleSummary {
                        style_prompt,
                        message,
                        file_count: machine.file_count(),
                        progress_log: machine.take_log(),
                        dropped_frames: stream.dropped_frames(),
                    });
                }
                StyleStep::Failed { message } => {
                    return Err(IngestError::Stream(message));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::cancel_channel;
    use mockito::Server;

    #[test]
    fn chunks_accumulate_with_separators() {
        let mut machine = StyleIngest::new();
        machine.apply(StyleEvent::Start {
            message: "analyzing".into(),
            file_count: 2,
        });
        machine.apply(StyleEvent::Chunk {
            content: "flat pastel shapes".into(),
        });
        machine.apply(StyleEvent::Chunk {
            content: "soft grain texture".into(),
        });

        assert_eq!(machine.text(), "flat pastel shapes\nsoft grain texture\n");
        assert_eq!(machine.file_count(), 2);

        let step = machine.apply(StyleEvent::Complete {
            message: "done".into(),
            style_prompt: None,
        });
        match step {
            StyleStep::Completed { style_prompt, .. } => {
                assert_eq!(style_prompt, "flat pastel shapes\nsoft grain texture\n");
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn complete_style_prompt_supersedes_accumulation() {
        let mut machine = StyleIngest::new();
        machine.apply(StyleEvent::Start {
            message: String::new(),
            file_count: 1,
        });
        machine.apply(StyleEvent::Chunk {
            content: "rough draft".into(),
        });

        let step = machine.apply(StyleEvent::Complete {
            message: "done".into(),
            style_prompt: Some("polished watercolor, muted palette".into()),
        });
        match step {
            StyleStep::Completed { style_prompt, .. } => {
                assert_eq!(style_prompt, "polished watercolor, muted palette");
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn blank_style_prompt_falls_back_to_chunks() {
        let mut machine = StyleIngest::new();
        machine.apply(StyleEvent::Chunk {
            content: "chalk outlines".into(),
        });
        let step = machine.apply(StyleEvent::Complete {
            message: String::new(),
            style_prompt: Some("   ".into()),
        });
        match step {
            StyleStep::Completed { style_prompt, .. } => {
                assert_eq!(style_prompt, "chalk outlines\n");
            }
            _ => panic!("expected completion"),
        }
    }

    fn reference_image() -> StyleImage {
        StyleImage {
            file_name: "ref.png".into(),
            content_type: "image/png".into(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[tokio::test]
    async fn runner_streams_chunks_and_publishes_preview() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/template/analyze-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"type\":\"start\",\"message\":\"analyzing\",\"file_count\":1}\n\n",
                "data: {\"type\":\"chunk_start\",\"message\":\"image 1\"}\n\n",
                "data: {\"type\":\"chunk\",\"content\":\"flat pastel\"}\n\n",
                "data: {\"type\":\"complete\",\"message\":\"done\"}\n",
            ))
            .create_async()
            .await;

        let runner = StyleRunner::new(ApiClient::new(server.url()));
        let preview = runner.subscribe_preview();
        let (_handle, cancel) = cancel_channel();

        let summary = runner.run(vec![reference_image()], cancel).await.unwrap();

        assert_eq!(summary.style_prompt, "flat pastel\n");
        assert_eq!(summary.file_count, 1);
        assert_eq!(summary.dropped_frames, 0);
        assert_eq!(*preview.borrow(), "flat pastel\n");
    }

    #[tokio::test]
    async fn runner_surfaces_stream_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/template/analyze-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"type\":\"start\",\"message\":\"analyzing\",\"file_count\":1}\n\n",
                "data: {\"type\":\"error\",\"message\":\"vision model unavailable\"}\n",
            ))
            .create_async()
            .await;

        let runner = StyleRunner::new(ApiClient::new(server.url()));
        let (_handle, cancel) = cancel_channel();

        let error = runner.run(vec![reference_image()], cancel).await.unwrap_err();
        match error {
            IngestError::Stream(message) => assert_eq!(message, "vision model unavailable"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_before_any_request() {
        let runner = StyleRunner::new(ApiClient::new("http://127.0.0.1:1"));
        let (_handle, cancel) = cancel_channel();
        let error = runner.run(Vec::new(), cancel).await.unwrap_err();
        assert!(matches!(error, IngestError::Api(_)));
    }
}
