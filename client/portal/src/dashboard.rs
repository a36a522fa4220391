//! Dashboard sync: folds pushed events into the admin dashboard's view state.
//!
//! Everything the dashboard reacts to (pushed events, the REST seed, timer
//! expiries) is funnelled through one ordered queue of [`DashboardMsg`]s.
//! [`DashboardState::apply`] is a pure reducer returning the [`Effect`]s to
//! run; the driver task spawned by [`DashboardSync::mount`] executes them.
//!
//! Pushed snapshots are committed after a short transition delay. A newer
//! snapshot cancels the pending commit, so an older snapshot is never shown
//! after a newer one arrived.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::realtime::PushEvent;
use crate::stats::{DashboardStats, Notification, NOTIFICATION_TTL};

/// Default pause between receiving a pushed snapshot and committing it.
pub const TRANSITION_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug)]
pub enum DashboardMsg {
    /// Result of the initial REST fetch.
    Seed(DashboardStats),
    /// The initial REST fetch failed.
    SeedFailed(String),
    Push(PushEvent),
    CommitSnapshot { seq: u64 },
    DismissNotification { seq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ScheduleCommit { seq: u64, after: Duration },
    CancelCommit,
    ScheduleDismiss { seq: u64, after: Duration },
    CancelDismiss,
}

/// What the dashboard renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardView {
    pub stats: Option<DashboardStats>,
    /// A pushed snapshot is waiting out its transition delay.
    pub recomputing: bool,
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, Copy)]
pub struct DashboardOptions {
    pub transition_delay: Duration,
    pub notification_ttl: Duration,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            transition_delay: TRANSITION_DELAY,
            notification_ttl: NOTIFICATION_TTL,
        }
    }
}

impl From<&Config> for DashboardOptions {
    fn from(config: &Config) -> Self {
        Self {
            transition_delay: config.transition_delay(),
            notification_ttl: config.notification_ttl(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Reducer
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DashboardState {
    view: DashboardView,
    options: DashboardOptions,
    pending: Option<(u64, DashboardStats)>,
    snapshot_seq: u64,
    notice_seq: u64,
}

impl DashboardState {
    pub fn new(options: DashboardOptions) -> Self {
        Self {
            view: DashboardView::default(),
            options,
            pending: None,
            snapshot_seq: 0,
            notice_seq: 0,
        }
    }

    pub fn view(&self) -> &DashboardView {
        &self.view
    }

    pub fn apply(&mut self, msg: DashboardMsg) -> Vec<Effect> {
        match msg {
            DashboardMsg::Seed(stats) => {
                // Arrival order wins: a seed landing after a push supersedes it.
                self.pending = None;
                self.view.stats = Some(stats);
                self.view.recomputing = false;
                vec![Effect::CancelCommit]
            }
            DashboardMsg::SeedFailed(message) => self.notify(Notification::error(message)),
            DashboardMsg::Push(PushEvent::StatsSnapshot(stats)) => {
                self.snapshot_seq += 1;
                self.pending = Some((self.snapshot_seq, stats));
                self.view.recomputing = true;
                vec![
                    Effect::CancelCommit,
                    Effect::ScheduleCommit {
                        seq: self.snapshot_seq,
                        after: self.options.transition_delay,
                    },
                ]
            }
            DashboardMsg::Push(PushEvent::DonationCreated(notice)) => {
                self.notify(Notification::donation_received(notice.amount))
            }
            DashboardMsg::CommitSnapshot { seq } => {
                match self.pending.take() {
                    Some((pending_seq, stats)) if pending_seq == seq => {
                        self.view.stats = Some(stats);
                        self.view.recomputing = false;
                    }
                    other => {
                        debug!("Dropping stale snapshot commit #{seq}");
                        self.pending = other;
                    }
                }
                Vec::new()
            }
            DashboardMsg::DismissNotification { seq } => {
                if seq == self.notice_seq {
                    self.view.notification = None;
                }
                Vec::new()
            }
        }
    }

    fn notify(&mut self, notification: Notification) -> Vec<Effect> {
        self.notice_seq += 1;
        self.view.notification = Some(notification);
        vec![
            Effect::CancelDismiss,
            Effect::ScheduleDismiss {
                seq: self.notice_seq,
                after: self.options.notification_ttl,
            },
        ]
    }
}

// ─────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────

/// A mounted dashboard. Dropping the realtime channel is not this type's
/// business: [`DashboardSync::unmount`] only stops listening.
pub struct DashboardSync {
    inbox: mpsc::UnboundedSender<DashboardMsg>,
    view: watch::Receiver<DashboardView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DashboardSync {
    pub fn mount(events: broadcast::Receiver<PushEvent>, options: DashboardOptions) -> Self {
        let (inbox, queue) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(DashboardView::default());
        let cancel = CancellationToken::new();

        tokio::spawn(forward_events(events, inbox.clone(), cancel.clone()));
        let task = tokio::spawn(drive(
            DashboardState::new(options),
            queue,
            inbox.clone(),
            view_tx,
            cancel.clone(),
        ));

        Self {
            inbox,
            view,
            cancel,
            task,
        }
    }

    /// Hand over the REST-fetched snapshot.
    pub fn seed(&self, stats: DashboardStats) {
        self.enqueue(DashboardMsg::Seed(stats));
    }

    pub fn seed_failed(&self, message: impl Into<String>) {
        self.enqueue(DashboardMsg::SeedFailed(message.into()));
    }

    fn enqueue(&self, msg: DashboardMsg) {
        if self.inbox.send(msg).is_err() {
            debug!("Dashboard already unmounted; message dropped");
        }
    }

    pub fn view(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    pub fn current(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Cancel pending timers and stop consuming push events.
    pub async fn unmount(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Dashboard task ended abnormally: {e}");
        }
        info!("Dashboard unmounted");
    }
}

async fn forward_events(
    mut events: broadcast::Receiver<PushEvent>,
    inbox: mpsc::UnboundedSender<DashboardMsg>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                if inbox.send(DashboardMsg::Push(event)).is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Dashboard fell behind the push channel, {skipped} events skipped");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn drive(
    mut state: DashboardState,
    mut queue: mpsc::UnboundedReceiver<DashboardMsg>,
    inbox: mpsc::UnboundedSender<DashboardMsg>,
    view: watch::Sender<DashboardView>,
    cancel: CancellationToken,
) {
    let mut commit_timer: Option<CancellationToken> = None;
    let mut dismiss_timer: Option<CancellationToken> = None;

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = queue.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        for effect in state.apply(msg) {
            match effect {
                Effect::CancelCommit => cancel_timer(&mut commit_timer),
                Effect::CancelDismiss => cancel_timer(&mut dismiss_timer),
                Effect::ScheduleCommit { seq, after } => {
                    commit_timer = Some(schedule(
                        &cancel,
                        &inbox,
                        after,
                        DashboardMsg::CommitSnapshot { seq },
                    ));
                }
                Effect::ScheduleDismiss { seq, after } => {
                    dismiss_timer = Some(schedule(
                        &cancel,
                        &inbox,
                        after,
                        DashboardMsg::DismissNotification { seq },
                    ));
                }
            }
        }

        let next = state.view().clone();
        view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    cancel_timer(&mut commit_timer);
    cancel_timer(&mut dismiss_timer);
}

fn cancel_timer(timer: &mut Option<CancellationToken>) {
    if let Some(token) = timer.take() {
        token.cancel();
    }
}

/// Deliver `msg` to the queue after `after`, unless cancelled first.
fn schedule(
    parent: &CancellationToken,
    inbox: &mpsc::UnboundedSender<DashboardMsg>,
    after: Duration,
    msg: DashboardMsg,
) -> CancellationToken {
    let token = parent.child_token();
    let inbox = inbox.clone();
    let guard = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = guard.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                let _ = inbox.send(msg);
            }
        }
    });
    token
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
