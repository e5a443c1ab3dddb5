pub mod api;
pub mod batch;
pub mod health;
pub mod ingest;
pub mod models;
pub mod sse;
pub mod store;

pub use api::{ApiClient, ApiError};
pub use batch::{BatchConfig, BatchError, BatchOrchestrator, BatchOutcome};
pub use ingest::outline::{OutlineIngest, OutlineRunner, OutlineSummary};
pub use ingest::style::{StyleIngest, StyleRunner, StyleSummary};
pub use ingest::{cancel_channel, CancelHandle, CancelSignal, IngestError, IngestState};
pub use models::{AspectRatio, ProjectRecord, SlideData, SlideStatus, SlideType, Template};
pub use store::{ProjectStore, SlidePatch, AUTOSAVE_QUIESCENCE};
