//! The fetcher: gap-free paging over the event log
//!
//! A [`Fetcher`] delivers successive [`EventPage`]s for one subscription. Each
//! page covers `(last_encountered, last_encountered + page_size]` and is
//! returned only once its observed sequences form an unbroken run.
//!
//! ## Gap convergence
//!
//! Sequences are allocated before their transaction commits, so a read can
//! see `1..=4` and `6..=10` while `5` is still in flight. The fetcher re-reads
//! the same window on the same session, `convergence_delay` apart, until the
//! page is sequential. Gaps are counted from `last_encountered + 1`, and a
//! window that is empty while later rows have settled is waited for the same
//! way. Attempts where no earlier gap closed count towards
//! `max_convergence_attempts`; once reached, the [`StallPolicy`] decides
//! between failing with [`Error::ConvergenceStalled`] and skipping the gap.
//!
//! ## Lifecycle
//!
//! ```text
//!            start                 pause
//! Waiting ─────────► Active ─────────────► Paused
//!    ▲                 │ │
//!    └──── stop ───────┘ └── tail reached: Continuous → Waiting, cooldown, Active
//!                                          OneShot    → Paused, track finished
//! ```
//!
//! The polling loop runs on one spawned task. `pause` and `stop` are
//! cooperative: they interrupt any delay and the loop exits at its next
//! check. Both return a [`FetchHandle`] resolving to the loop's outcome. A
//! fatal error ends the loop, is reported to the [`DaemonLogger`], and leaves
//! the state `Active` until the owner stops or pauses the fetcher.

use crate::cancel::CancellationToken;
use crate::error_handler::{ErrorHandler, ExponentialBackoff, RetryPolicy};
use crate::logger::{DaemonLogger, TracingDaemonLogger};
use crate::selector::{resolve_rows_async, EventSelector};
use crate::track::ProjectionTrack;
use cadence_core::{AsyncOptions, DaemonSettings, Error, EventPage, Result, StallPolicy};
use cadence_storage::{EventLog, LogSession, WindowQuery};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What the fetcher does once it reaches the tail of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaemonLifecycle {
    /// Keep polling, pausing for the cooldown each time the tail is reached
    #[default]
    Continuous,
    /// Stop at the tail and report the checkpoint (rebuilds)
    OneShot,
}

/// Fetcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetcherState {
    /// Not polling; ready to start
    #[default]
    Waiting,
    /// Polling loop running
    Active,
    /// Stopped by `pause` or at the end of a one-shot run
    Paused,
}

impl fmt::Display for FetcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherState::Waiting => f.write_str("waiting"),
            FetcherState::Active => f.write_str("active"),
            FetcherState::Paused => f.write_str("paused"),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures a [`Fetcher`]
pub struct FetcherBuilder {
    name: String,
    log: Arc<dyn EventLog>,
    selector: Arc<dyn EventSelector>,
    settings: DaemonSettings,
    options: AsyncOptions,
    event_type_names: Vec<String>,
    logger: Arc<dyn DaemonLogger>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl FetcherBuilder {
    /// Start configuring a fetcher named `name` over `log`
    pub fn new(
        name: impl Into<String>,
        log: Arc<dyn EventLog>,
        selector: Arc<dyn EventSelector>,
    ) -> Self {
        Self {
            name: name.into(),
            log,
            selector,
            settings: DaemonSettings::default(),
            options: AsyncOptions::default(),
            event_type_names: Vec::new(),
            logger: Arc::new(TracingDaemonLogger),
            retry_policy: None,
        }
    }

    /// Set daemon settings
    pub fn with_settings(mut self, settings: DaemonSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set per-projection options
    pub fn with_options(mut self, options: AsyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribe to these type aliases
    pub fn with_event_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_type_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Report lifecycle notifications to `logger`
    pub fn with_logger(mut self, logger: Arc<dyn DaemonLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the retry policy derived from `settings.retry`
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Validate the configuration and create the fetcher
    pub fn build(self) -> Result<Fetcher> {
        self.settings.validate()?;
        if self.options.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".to_string()));
        }
        if self.selector.identity() != self.log.stream_identity() {
            return Err(Error::Config(format!(
                "selector reads {} streams but the log stores {} streams",
                self.selector.identity(),
                self.log.stream_identity()
            )));
        }

        let policy = self
            .retry_policy
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::new(self.settings.retry.clone())));
        let handler = ErrorHandler::new(policy, Arc::clone(&self.logger));

        Ok(Fetcher {
            core: Arc::new(Core {
                name: self.name,
                log: self.log,
                selector: self.selector,
                settings: self.settings,
                options: self.options,
                event_type_names: self.event_type_names,
                logger: self.logger,
                handler,
                state: Mutex::new(FetcherState::Waiting),
                last_encountered: AtomicU64::new(0),
            }),
            run: Mutex::new(Run::default()),
        })
    }
}

// ============================================================================
// Fetcher
// ============================================================================

struct Core {
    name: String,
    log: Arc<dyn EventLog>,
    selector: Arc<dyn EventSelector>,
    settings: DaemonSettings,
    options: AsyncOptions,
    event_type_names: Vec<String>,
    logger: Arc<dyn DaemonLogger>,
    handler: ErrorHandler,
    state: Mutex<FetcherState>,
    last_encountered: AtomicU64,
}

#[derive(Default)]
struct Run {
    halt: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

/// Page fetcher for one subscription
pub struct Fetcher {
    core: Arc<Core>,
    run: Mutex<Run>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .field("last_encountered", &self.last_encountered())
            .finish()
    }
}

impl Fetcher {
    /// Start configuring a fetcher
    pub fn builder(
        name: impl Into<String>,
        log: Arc<dyn EventLog>,
        selector: Arc<dyn EventSelector>,
    ) -> FetcherBuilder {
        FetcherBuilder::new(name, log, selector)
    }

    /// Fetcher name, used in notifications
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> FetcherState {
        *self.core.state.lock()
    }

    /// Subscribed type aliases
    pub fn event_type_names(&self) -> &[String] {
        &self.core.event_type_names
    }

    /// Internal cursor: the highest sequence handed to the track
    pub fn last_encountered(&self) -> u64 {
        self.core.last_encountered.load(Ordering::SeqCst)
    }

    /// True while a polling loop task has not exited
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Fetch the page after `last_encountered`
    ///
    /// Runs under the error handler and converges any sequence gap before
    /// returning. Does not touch the internal cursor.
    pub async fn fetch_next_page(&self, last_encountered: u64) -> Result<EventPage> {
        self.core
            .fetch(last_encountered, &CancellationToken::new())
            .await
    }

    /// Start polling for `track`
    ///
    /// Fails with [`Error::InvalidTransition`] when already active or while
    /// a previous loop is still winding down. Must be called from within a
    /// Tokio runtime.
    pub fn start(
        &self,
        track: Arc<dyn ProjectionTrack>,
        lifecycle: DaemonLifecycle,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("fetcher needs a tokio runtime: {}", e)))?;

        let mut run = self.run.lock();
        if run.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(Error::InvalidTransition {
                action: "start",
                state: format!("{} (loop still running)", self.state()),
            });
        }
        {
            let mut state = self.core.state.lock();
            if *state == FetcherState::Active {
                return Err(Error::InvalidTransition {
                    action: "start",
                    state: state.to_string(),
                });
            }
            *state = FetcherState::Active;
        }

        let checkpoint = track.last_encountered();
        self.core
            .last_encountered
            .fetch_max(checkpoint, Ordering::SeqCst);
        debug!(
            fetcher = %self.core.name,
            track = track.name(),
            from = self.last_encountered(),
            ?lifecycle,
            "starting fetcher"
        );

        let halt = CancellationToken::new();
        let core = Arc::clone(&self.core);
        let task = runtime.spawn(core.run(track, lifecycle, halt.clone(), cancellation));
        run.halt = halt;
        run.task = Some(task);
        Ok(())
    }

    /// Ask the loop to stop after its current iteration; state becomes `Paused`
    pub fn pause(&self) -> FetchHandle {
        let running = self.is_running();
        {
            let mut state = self.core.state.lock();
            if *state == FetcherState::Active || running {
                *state = FetcherState::Paused;
            }
        }
        self.halt()
    }

    /// Ask the loop to stop after its current iteration; state becomes `Waiting`
    pub fn stop(&self) -> FetchHandle {
        *self.core.state.lock() = FetcherState::Waiting;
        self.halt()
    }

    /// Zero the internal cursor
    pub fn reset(&self) {
        self.core.last_encountered.store(0, Ordering::SeqCst);
    }

    fn halt(&self) -> FetchHandle {
        let mut run = self.run.lock();
        run.halt.cancel();
        FetchHandle {
            task: run.task.take(),
        }
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.run.get_mut().halt.cancel();
    }
}

/// Completion of a polling loop
#[derive(Debug)]
pub struct FetchHandle {
    task: Option<JoinHandle<Result<()>>>,
}

impl FetchHandle {
    /// Wait for the loop to exit and return its outcome
    ///
    /// Resolves immediately when no loop was running.
    pub async fn join(self) -> Result<()> {
        match self.task {
            Some(task) => task
                .await
                .map_err(|e| Error::TaskPanicked(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// True once the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

// ============================================================================
// Polling
// ============================================================================

impl Core {
    fn state(&self) -> FetcherState {
        *self.state.lock()
    }

    fn transition(&self, from: FetcherState, to: FetcherState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    async fn run(
        self: Arc<Self>,
        track: Arc<dyn ProjectionTrack>,
        lifecycle: DaemonLifecycle,
        halt: CancellationToken,
        cancellation: CancellationToken,
    ) -> Result<()> {
        self.logger.fetch_started(&self.name);

        let outcome = tokio::select! {
            result = self.poll(track.as_ref(), lifecycle, &halt) => result,
            _ = cancellation.cancelled() => Err(Error::Cancelled),
        };

        let outcome = match outcome {
            Err(e) if e.is_cancelled() => {
                if cancellation.is_cancelled() {
                    self.transition(FetcherState::Active, FetcherState::Waiting);
                }
                Ok(())
            }
            Err(e) => {
                self.logger.fetch_failed(&self.name, &e);
                Err(e)
            }
            Ok(()) => Ok(()),
        };

        self.logger.fetching_stopped(&self.name);
        outcome
    }

    async fn poll(
        &self,
        track: &dyn ProjectionTrack,
        lifecycle: DaemonLifecycle,
        halt: &CancellationToken,
    ) -> Result<()> {
        while !halt.is_cancelled() && self.state() == FetcherState::Active {
            let from = self.last_encountered.load(Ordering::SeqCst);
            let page = self.fetch(from, halt).await?;

            let ending = page.ending();
            let caught_up = page.should_pause();
            if ending > from || page.count() > 0 {
                track.queue_page(page)?;
                self.last_encountered.fetch_max(ending, Ordering::SeqCst);
            }

            if !caught_up {
                continue;
            }
            self.logger.fetching_is_at_end_of_events(&self.name, ending);

            match lifecycle {
                DaemonLifecycle::OneShot => {
                    track.finished(ending)?;
                    self.transition(FetcherState::Active, FetcherState::Paused);
                    return Ok(());
                }
                DaemonLifecycle::Continuous => {
                    if !self.transition(FetcherState::Active, FetcherState::Waiting) {
                        return Ok(());
                    }
                    self.logger.pausing_fetching(&self.name, ending);
                    if halt.sleep(self.settings.fetching_cooldown()).await.is_err() {
                        return Ok(());
                    }
                    if !self.transition(FetcherState::Waiting, FetcherState::Active) {
                        return Ok(());
                    }
                    self.logger.fetching_resumed(&self.name);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    async fn fetch(&self, last_encountered: u64, halt: &CancellationToken) -> Result<EventPage> {
        self.handler
            .try_action(&self.name, halt, move || {
                self.fetch_page(last_encountered, halt)
            })
            .await
    }

    async fn fetch_page(&self, last_encountered: u64, halt: &CancellationToken) -> Result<EventPage> {
        let query = WindowQuery::new(
            last_encountered,
            self.options.page_size,
            self.settings.leading_edge_buffer(),
            self.event_type_names.clone(),
        );
        let mut session = self.log.open_session().await?;

        let mut page = self.read_page(session.as_mut(), &query).await?;
        if page.is_sequential() {
            return Ok(page);
        }

        let mut stalled = 0u32;
        loop {
            debug!(
                fetcher = %self.name,
                from = last_encountered,
                missing = ?page.missing_sequences(),
                "waiting for sequence gap to close"
            );
            halt.sleep(self.settings.convergence_delay()).await?;

            let previous = page;
            page = self.read_page(session.as_mut(), &query).await?;
            if page.is_sequential() {
                return Ok(page);
            }

            if page.can_continue_processing(&previous) {
                stalled = 0;
            } else {
                stalled += 1;
            }
            if stalled < self.settings.max_convergence_attempts {
                continue;
            }

            let missing = page.missing_sequences();
            self.logger
                .convergence_stalled(&self.name, last_encountered, &missing, stalled);
            return match self.settings.stall_policy {
                StallPolicy::Fail => Err(Error::ConvergenceStalled {
                    from: last_encountered,
                    missing,
                    attempts: stalled,
                }),
                StallPolicy::Skip => {
                    warn!(
                        fetcher = %self.name,
                        from = last_encountered,
                        ?missing,
                        "skipping sequence gap that did not close"
                    );
                    Ok(page.skip_gaps())
                }
            };
        }
    }

    async fn read_page(&self, session: &mut dyn LogSession, query: &WindowQuery) -> Result<EventPage> {
        let mut window = session.fetch_window(query).await?;
        let events = resolve_rows_async(self.selector.as_ref(), &mut window.rows).await?;

        Ok(EventPage::new(query.after, self.options.page_size, window.sequences, events)
            .with_known_sequences(
                window.next_known.unwrap_or(0),
                window.last_known.unwrap_or(0),
            )
            .with_stream_identity(self.selector.identity()))
    }
}
