//! One viewing session: the fallback state machine and its driver task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{
    FailureCause, PlaybackError, ProbeSet, ResolutionFailed, SessionState, SourceState,
};
use crate::config::ResolverConfig;
use crate::probe::{
    PlayableHandle, ProbeError, SourceKind, SourceProbe, StreamReferences, TorrentHandle,
    TransferStats,
};

/// Handle to a running resolution.
///
/// State changes are published on a watch channel. `dispose` (or dropping
/// the handle) cancels in-flight probes and stats polling; once it returns,
/// no further state or stats update is published.
pub struct StreamSession {
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    playback: mpsc::UnboundedSender<(u64, PlaybackError)>,
}

impl StreamSession {
    pub(super) fn start(
        references: StreamReferences,
        probes: ProbeSet,
        config: ResolverConfig,
    ) -> Self {
        let shared = Arc::new(SessionShared::new());
        let cancel = CancellationToken::new();
        let (playback, playback_reports) = mpsc::unbounded_channel();

        let driver = Driver {
            references,
            probes,
            config,
            shared: shared.clone(),
            cancel: cancel.clone(),
            playback_reports,
        };
        tokio::spawn(driver.run());

        Self {
            shared,
            cancel,
            playback,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn source_state(&self) -> SourceState {
        self.shared.state.borrow().source_state
    }

    /// Receiver observing every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Every phase entered so far, starting with Idle.
    pub fn transitions(&self) -> Vec<SourceState> {
        self.shared.cell.lock().transitions.clone()
    }

    /// Waits until the session is Ready or Failed. Returns `None` if the
    /// session is disposed first.
    pub async fn wait_until_settled(&self) -> Option<SessionState> {
        let mut receiver = self.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            settled = receiver.wait_for(|state| state.source_state.is_settled()) => {
                settled.ok().map(|state| state.clone())
            }
        }
    }

    /// Reports a failure of the player consuming the resolved handle.
    ///
    /// Returns false, dropping the report, unless the session is currently
    /// Ready. A content-addressed stream with a fallback URL is demoted to
    /// the origin; anything else fails the session.
    pub fn report_playback_error(&self, error: PlaybackError) -> bool {
        let Some(generation) = self.shared.ready_generation() else {
            tracing::debug!("Ignoring playback error outside Ready: {}", error);
            return false;
        };
        self.playback.send((generation, error)).is_ok()
    }

    /// Cancels all probes and polling. Idempotent.
    pub fn dispose(&self) {
        if self.shared.dispose() {
            self.cancel.cancel();
            tracing::debug!("Stream session disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cell.lock().disposed
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("source_state", &self.source_state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// State shared by the session handle and its driver. Every publish happens
/// under `cell` after checking the disposal flag and generation.
struct SessionShared {
    cell: Mutex<SessionCell>,
    state: watch::Sender<SessionState>,
}

struct SessionCell {
    /// Bumped on every transition and on disposal
    generation: u64,
    disposed: bool,
    transitions: Vec<SourceState>,
}

impl SessionShared {
    fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            cell: Mutex::new(SessionCell {
                generation: 0,
                disposed: false,
                transitions: vec![SourceState::Idle],
            }),
            state,
        }
    }

    /// Enters `next`, resetting stats. Returns the new generation, or `None`
    /// if the session has been disposed.
    fn transition(
        &self,
        next: SourceState,
        resolved_handle: Option<String>,
        failure: Option<ResolutionFailed>,
    ) -> Option<u64> {
        let mut cell = self.cell.lock();
        if cell.disposed {
            return None;
        }

        cell.generation += 1;
        cell.transitions.push(next);
        let previous = self.state.borrow().source_state;
        self.state.send_modify(|state| {
            *state = SessionState {
                source_state: next,
                active_source: next.active_source(),
                stats: TransferStats::default(),
                resolved_handle,
                failure,
            };
        });

        tracing::debug!("Stream session: {} -> {}", previous, next);
        Some(cell.generation)
    }

    /// Whether `generation` is still the live phase of an undisposed session.
    fn is_current(&self, generation: u64) -> bool {
        let cell = self.cell.lock();
        !cell.disposed && cell.generation == generation
    }

    /// Publishes telemetry for the phase started at `generation`. Returns
    /// false if that phase is over.
    fn publish_stats(&self, generation: u64, stats: TransferStats) -> bool {
        let cell = self.cell.lock();
        if cell.disposed || cell.generation != generation {
            return false;
        }

        self.state.send_if_modified(|state| {
            if state.stats == stats {
                false
            } else {
                state.stats = stats;
                true
            }
        });
        true
    }

    fn ready_generation(&self) -> Option<u64> {
        let cell = self.cell.lock();
        let ready = matches!(self.state.borrow().source_state, SourceState::Ready(_));
        (!cell.disposed && ready).then_some(cell.generation)
    }

    /// Marks the session disposed. Returns false if it already was.
    fn dispose(&self) -> bool {
        let mut cell = self.cell.lock();
        if cell.disposed {
            return false;
        }
        cell.disposed = true;
        cell.generation += 1;
        true
    }
}

enum Step {
    ProbeP2p,
    ProbeGateway,
    ProbeOrigin,
    Serve(SourceKind, PlayableHandle),
    Fail(ResolutionFailed),
    Stop,
}

struct Driver {
    references: StreamReferences,
    probes: ProbeSet,
    config: ResolverConfig,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    playback_reports: mpsc::UnboundedReceiver<(u64, PlaybackError)>,
}

impl Driver {
    async fn run(mut self) {
        let mut step = Step::ProbeP2p;
        loop {
            step = match step {
                Step::ProbeP2p => self.probe_p2p().await,
                Step::ProbeGateway => self.probe_gateway().await,
                Step::ProbeOrigin => self.probe_origin().await,
                Step::Serve(kind, handle) => self.serve(kind, handle).await,
                Step::Fail(failure) => {
                    self.fail(failure);
                    Step::Stop
                }
                Step::Stop => break,
            };
        }
        tracing::trace!("Stream session driver stopped");
    }

    async fn probe_p2p(&self) -> Step {
        let Some(generation) = self.shared.transition(SourceState::ProbingP2p, None, None) else {
            return Step::Stop;
        };

        let result = self
            .attempt(&self.probes.p2p, Some(self.config.p2p_timeout))
            .await;
        if !self.shared.is_current(generation) {
            return Step::Stop;
        }

        match result {
            Ok(handle) => Step::Serve(SourceKind::P2p, handle),
            Err(ProbeError::Cancelled) => Step::Stop,
            Err(e) => {
                tracing::warn!("P2P unavailable, trying gateways: {}", e);
                Step::ProbeGateway
            }
        }
    }

    async fn probe_gateway(&self) -> Step {
        let Some(generation) = self.shared.transition(SourceState::ProbingGateway, None, None)
        else {
            return Step::Stop;
        };

        let result = self.attempt(&self.probes.gateway, None).await;
        if !self.shared.is_current(generation) {
            return Step::Stop;
        }

        match result {
            Ok(handle) => Step::Serve(SourceKind::ContentAddressed, handle),
            Err(ProbeError::Cancelled) => Step::Stop,
            Err(e) if self.references.fallback_url.is_some() => {
                tracing::warn!("Gateways unavailable, trying origin: {}", e);
                Step::ProbeOrigin
            }
            Err(e) => Step::Fail(ResolutionFailed {
                last_source: SourceKind::ContentAddressed,
                cause: e.into(),
            }),
        }
    }

    async fn probe_origin(&self) -> Step {
        let Some(generation) = self.shared.transition(SourceState::ProbingOrigin, None, None)
        else {
            return Step::Stop;
        };

        let result = self.attempt(&self.probes.origin, None).await;
        if !self.shared.is_current(generation) {
            return Step::Stop;
        }

        match result {
            Ok(handle) => Step::Serve(SourceKind::Origin, handle),
            Err(ProbeError::Cancelled) => Step::Stop,
            Err(e) => Step::Fail(ResolutionFailed {
                last_source: SourceKind::Origin,
                cause: e.into(),
            }),
        }
    }

    /// Runs one probe under a child token that is cancelled as soon as the
    /// attempt ends, including when `deadline` cuts it short.
    async fn attempt(
        &self,
        probe: &Arc<dyn SourceProbe>,
        deadline: Option<Duration>,
    ) -> Result<PlayableHandle, ProbeError> {
        let probe_cancel = self.cancel.child_token();
        let _cancel_on_exit = probe_cancel.clone().drop_guard();
        let attempt = probe.probe(&self.references, probe_cancel);

        match deadline {
            Some(after) => tokio::time::timeout(after, attempt)
                .await
                .unwrap_or(Err(ProbeError::Timeout { after })),
            None => attempt.await,
        }
    }

    /// Ready phase. Polls telemetry when streaming from peers and waits for
    /// playback errors or disposal.
    async fn serve(&mut self, kind: SourceKind, handle: PlayableHandle) -> Step {
        let Some(generation) =
            self.shared
                .transition(SourceState::Ready(kind), Some(handle.url.clone()), None)
        else {
            return Step::Stop;
        };
        tracing::info!("Streaming from {} source: {}", kind, handle.url);

        let mut poller = match (kind, handle.torrent) {
            (SourceKind::P2p, Some(torrent)) => {
                Some(StatsPoller::new(torrent, self.config.stats_interval))
            }
            _ => None,
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Step::Stop,
                report = self.playback_reports.recv() => match report {
                    Some((reported, error)) if reported == generation => {
                        return self.demote(kind, error);
                    }
                    Some(_) => tracing::debug!("Dropping playback error from an earlier phase"),
                    None => return Step::Stop,
                },
                stats = next_stats(&mut poller) => {
                    if !self.shared.publish_stats(generation, stats) {
                        return Step::Stop;
                    }
                }
            }
        }
    }

    fn demote(&self, kind: SourceKind, error: PlaybackError) -> Step {
        if kind == SourceKind::ContentAddressed && self.references.fallback_url.is_some() {
            tracing::warn!("Gateway stream failed, demoting to origin: {}", error);
            return Step::ProbeOrigin;
        }

        Step::Fail(ResolutionFailed {
            last_source: kind,
            cause: FailureCause::Playback(error),
        })
    }

    fn fail(&self, failure: ResolutionFailed) {
        tracing::warn!("Stream resolution failed: {}", failure);
        self.shared
            .transition(SourceState::Failed, None, Some(failure));
    }
}

/// Telemetry poller living only inside the Ready(p2p) phase.
struct StatsPoller {
    torrent: Arc<dyn TorrentHandle>,
    interval: tokio::time::Interval,
}

impl StatsPoller {
    fn new(torrent: Arc<dyn TorrentHandle>, period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self { torrent, interval }
    }

    async fn tick(&mut self) -> TransferStats {
        self.interval.tick().await;
        self.torrent.stats()
    }
}

async fn next_stats(poller: &mut Option<StatsPoller>) -> TransferStats {
    match poller {
        Some(poller) => poller.tick().await,
        None => std::future::pending().await,
    }
}
