//! Debounced render scheduling
//!
//! Typing produces a stream of text changes; parsing after every keystroke
//! is wasteful, so changes are coalesced: each call to
//! [`RenderScheduler::debounce_render`] restarts a timer and only the most
//! recent content is rendered once the timer fires. Explicit refreshes skip
//! the delay.
//!
//! Finished documents are published over a watch channel. A render that has
//! been superseded by a newer one never overwrites the newer result.

use crate::error::RenderError;
use crate::markdown::{Document, MarkdownParser};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the scheduler is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Idle,
    /// Waiting for the debounce timer
    Scheduled,
    Rendering,
}

#[derive(Default)]
struct RenderState {
    scheduled: bool,
    /// Identifies the debounce timer that currently owns `scheduled`
    timer_id: u64,
    active_renders: usize,
    rendered_document: Option<Arc<Document>>,
    last_content: Option<String>,
    last_error: Option<RenderError>,
    render_count: u64,
}

struct Shared {
    parser: Arc<dyn MarkdownParser>,
    state: Mutex<RenderState>,
    /// Content waiting for the debounce timer
    pending: Mutex<Option<String>>,
    generation: AtomicU64,
    documents: watch::Sender<Option<Arc<Document>>>,
    refresh: watch::Sender<u64>,
}

impl Shared {
    fn render_now(&self, content: String) -> Result<Arc<Document>, RenderError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.parser.parse(&content).map(Arc::new);

        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            log::trace!("Discarding superseded render {}", generation);
            return Err(RenderError::Cancelled);
        }

        state.last_content = Some(content);
        match &result {
            Ok(document) => {
                state.rendered_document = Some(Arc::clone(document));
                state.last_error = None;
                state.render_count += 1;
                self.documents.send_replace(Some(Arc::clone(document)));
            }
            Err(e) => {
                log::error!("Render failed: {}", e);
                state.last_error = Some(e.clone());
            }
        }
        result
    }

    /// Render the pending content if timer `id` is still the live one
    fn fire_timer(self: &Arc<Self>, id: u64) -> bool {
        {
            let mut state = self.state.lock();
            if state.timer_id != id {
                log::trace!("Ignoring stale debounce timer {}", id);
                return false;
            }
            state.scheduled = false;
            state.active_renders += 1;
        }
        let _rendering = RenderingGuard(Arc::clone(self));

        let content = self.pending.lock().take();
        if let Some(content) = content {
            let _ = self.render_now(content);
        }
        true
    }
}

/// Marks a render in progress for as long as it lives
struct RenderingGuard(Arc<Shared>);

impl RenderingGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.state.lock().active_renders += 1;
        Self(Arc::clone(shared))
    }
}

impl Drop for RenderingGuard {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.active_renders = state.active_renders.saturating_sub(1);
    }
}

/// Coalesces text changes into markdown renders
pub struct RenderScheduler {
    shared: Arc<Shared>,
    delay: Duration,
    timer: Option<JoinHandle<()>>,
    task: Option<JoinHandle<()>>,
}

impl RenderScheduler {
    pub fn new(parser: Arc<dyn MarkdownParser>, delay: Duration) -> Self {
        let (documents, _) = watch::channel(None);
        let (refresh, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                parser,
                state: Mutex::new(RenderState::default()),
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                documents,
                refresh,
            }),
            delay,
            timer: None,
            task: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Render `content` once no newer content arrives within the delay
    pub fn debounce_render(&mut self, content: impl Into<String>) {
        *self.shared.pending.lock() = Some(content.into());
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let id = {
            let mut state = self.shared.state.lock();
            state.timer_id += 1;
            state.scheduled = true;
            state.timer_id
        };

        let shared = Arc::clone(&self.shared);
        let delay = self.delay;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_timer(id);
        }));
    }

    /// Drop any pending timer and in-flight render, then render `content` now
    pub fn force_render(&mut self, content: impl Into<String>) {
        self.cancel_pending_render();
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let rendering = RenderingGuard::new(&self.shared);
        let shared = Arc::clone(&self.shared);
        let content = content.into();
        self.task = Some(tokio::spawn(async move {
            let _rendering = rendering;
            let _ = shared.render_now(content);
        }));
    }

    /// Parse `content` on the caller's task and publish the result
    pub async fn render(&self, content: &str) -> Result<Arc<Document>, RenderError> {
        let _rendering = RenderingGuard::new(&self.shared);
        self.shared.render_now(content.to_string())
    }

    /// Stop the debounce timer without rendering
    pub fn cancel_pending_render(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.shared.pending.lock().take();
        let mut state = self.shared.state.lock();
        state.timer_id += 1;
        state.scheduled = false;
    }

    /// Bump the refresh trigger and render `content` immediately
    pub fn refresh_preview(&mut self, content: impl Into<String>) {
        self.shared.refresh.send_modify(|trigger| *trigger += 1);
        self.force_render(content);
    }

    pub fn phase(&self) -> RenderPhase {
        let state = self.shared.state.lock();
        if state.active_renders > 0 {
            RenderPhase::Rendering
        } else if state.scheduled {
            RenderPhase::Scheduled
        } else {
            RenderPhase::Idle
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.state.lock().active_renders > 0
    }

    /// The most recently published document
    pub fn rendered_document(&self) -> Option<Arc<Document>> {
        self.shared.state.lock().rendered_document.clone()
    }

    pub fn last_error(&self) -> Option<RenderError> {
        self.shared.state.lock().last_error.clone()
    }

    /// Number of documents published so far
    pub fn render_count(&self) -> u64 {
        self.shared.state.lock().render_count
    }

    /// Incremented whenever the preview is explicitly refreshed
    pub fn refresh_trigger(&self) -> u64 {
        *self.shared.refresh.borrow()
    }

    /// Receive every published document
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Document>>> {
        self.shared.documents.subscribe()
    }

    /// Receive refresh trigger changes
    pub fn subscribe_refresh(&self) -> watch::Receiver<u64> {
        self.shared.refresh.subscribe()
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::CommonMarkParser;

    #[derive(Default)]
    struct CountingParser {
        inputs: Mutex<Vec<String>>,
    }

    impl CountingParser {
        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().clone()
        }
    }

    impl MarkdownParser for CountingParser {
        fn parse(&self, text: &str) -> Result<Document, RenderError> {
            self.inputs.lock().push(text.to_string());
            CommonMarkParser::new().parse(text)
        }
    }

    struct FailingParser;

    impl MarkdownParser for FailingParser {
        fn parse(&self, _text: &str) -> Result<Document, RenderError> {
            Err(RenderError::Parse("unsupported".to_string()))
        }
    }

    /// Blocks its thread on inputs starting with "slow"
    struct SlowParser;

    impl MarkdownParser for SlowParser {
        fn parse(&self, text: &str) -> Result<Document, RenderError> {
            if text.starts_with("slow") {
                std::thread::sleep(Duration::from_millis(300));
            }
            CommonMarkParser::new().parse(text)
        }
    }

    fn scheduler(parser: Arc<CountingParser>) -> RenderScheduler {
        RenderScheduler::new(parser, Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_renders_last_content_once() {
        let parser = Arc::new(CountingParser::default());
        let mut scheduler = scheduler(parser.clone());

        for i in 0..5 {
            scheduler.debounce_render(format!("# Draft {}", i));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(scheduler.phase(), RenderPhase::Scheduled);
        assert!(parser.inputs().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(parser.inputs(), vec!["# Draft 4"]);
        assert_eq!(scheduler.phase(), RenderPhase::Idle);
        assert_eq!(scheduler.render_count(), 1);
        assert!(scheduler.rendered_document().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_render_skips_timer() {
        let parser = Arc::new(CountingParser::default());
        let mut scheduler = scheduler(parser.clone());

        scheduler.debounce_render("draft");
        scheduler.force_render("final");
        assert!(scheduler.is_rendering());
        assert_eq!(scheduler.phase(), RenderPhase::Rendering);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(parser.inputs(), vec!["final"]);
        assert!(!scheduler.is_rendering());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_render() {
        let parser = Arc::new(CountingParser::default());
        let mut scheduler = scheduler(parser.clone());

        scheduler.debounce_render("draft");
        scheduler.cancel_pending_render();
        assert_eq!(scheduler.phase(), RenderPhase::Idle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(parser.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_render_publishes_document() {
        let parser = Arc::new(CountingParser::default());
        let scheduler = scheduler(parser);
        let mut documents = scheduler.subscribe();

        let document = scheduler.render("![logo](logo.png)").await.unwrap();
        assert_eq!(document.images().len(), 1);
        assert!(!scheduler.is_rendering());

        assert!(documents.has_changed().unwrap());
        let published = documents.borrow_and_update().clone().unwrap();
        assert!(Arc::ptr_eq(&published, &document));
    }

    #[tokio::test]
    async fn test_render_error_keeps_previous_document() {
        let scheduler = RenderScheduler::new(Arc::new(FailingParser), Duration::from_millis(10));
        let result = scheduler.render("anything").await;

        assert_eq!(result.unwrap_err(), RenderError::Parse("unsupported".to_string()));
        assert!(scheduler.rendered_document().is_none());
        assert!(scheduler.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_preview_bumps_trigger() {
        let parser = Arc::new(CountingParser::default());
        let mut scheduler = scheduler(parser.clone());
        let refresh = scheduler.subscribe_refresh();

        scheduler.refresh_preview("# Title");
        assert_eq!(scheduler.refresh_trigger(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler.refresh_preview("# Title");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*refresh.borrow(), 2);
        assert_eq!(parser.inputs(), vec!["# Title", "# Title"]);
        assert_eq!(scheduler.render_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_preview_renders_pending_edit() {
        let parser = Arc::new(CountingParser::default());
        let mut scheduler = scheduler(parser.clone());

        scheduler.render("# Old").await.unwrap();
        scheduler.debounce_render("# New edit");
        scheduler.refresh_preview("# New edit");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(parser.inputs(), vec!["# Old", "# New edit"]);
        assert_eq!(scheduler.rendered_document().unwrap().source_len, "# New edit".len());
        assert_eq!(scheduler.phase(), RenderPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_leaves_newer_schedule_alone() {
        let parser = Arc::new(CountingParser::default());
        let mut scheduler = scheduler(parser.clone());

        scheduler.debounce_render("# First");
        let stale = scheduler.shared.state.lock().timer_id;
        scheduler.debounce_render("# Second");

        assert!(!scheduler.shared.fire_timer(stale));
        assert_eq!(scheduler.phase(), RenderPhase::Scheduled);
        assert_eq!(scheduler.shared.pending.lock().as_deref(), Some("# Second"));
        assert!(parser.inputs().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(parser.inputs(), vec!["# Second"]);
        assert_eq!(scheduler.phase(), RenderPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_superseded_render_is_discarded() {
        let scheduler = Arc::new(RenderScheduler::new(Arc::new(SlowParser), Duration::from_millis(10)));

        let background = Arc::clone(&scheduler);
        let slow = tokio::spawn(async move { background.render("slow draft").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fast = scheduler.render("# fast").await.unwrap();
        let slow = slow.await.unwrap();

        assert!(matches!(slow, Err(RenderError::Cancelled)));
        assert!(Arc::ptr_eq(&scheduler.rendered_document().unwrap(), &fast));
        assert_eq!(scheduler.render_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_force_render_during_debounced_render() {
        let mut scheduler = RenderScheduler::new(Arc::new(SlowParser), Duration::from_millis(10));
        let mut documents = scheduler.subscribe();

        scheduler.debounce_render("slow draft");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_rendering());

        scheduler.force_render("# final");
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(scheduler.rendered_document().unwrap().source_len, "# final".len());
        let published = documents.borrow_and_update().clone().unwrap();
        assert_eq!(published.source_len, "# final".len());
        assert_eq!(scheduler.render_count(), 1);
        assert_eq!(scheduler.phase(), RenderPhase::Idle);
    }
}
