use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};

use crate::catalog::{Catalog, Message, MessageDate};
use crate::clock::Clock;
use crate::resolver;
use crate::state::{StateError, StateStore};

/// "A new message is available": sent at most once per calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageSignal {
    pub day: MessageDate,
    /// The message that is current once the threshold passed. `None` on days
    /// with nothing released yet.
    pub message: Option<Message>,
}

/// Delivers signals to the user.
pub trait Notifier: Send {
    fn deliver(&self, signal: &NewMessageSignal) -> Result<()>;
}

pub struct NotificationGate {
    catalog: Arc<Catalog>,
    state: StateStore,
    clock: Arc<dyn Clock>,
}

impl NotificationGate {
    pub fn new(catalog: Arc<Catalog>, state: StateStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            state,
            clock,
        }
    }

    /// Checks whether today's signal is due. The last-sent marker is written
    /// before the signal is returned, so a failed write yields an error and
    /// the next poll tries again.
    pub fn poll(&self) -> Result<Option<NewMessageSignal>, StateError> {
        Ok(self.claim()?.map(|(_, signal)| signal))
    }

    /// Like [`NotificationGate::poll`], but hands the signal to `notifier`.
    /// When delivery fails the previous marker is put back so a later poll
    /// fires again the same day.
    pub fn deliver_due(&self, notifier: &dyn Notifier) -> Result<Option<NewMessageSignal>> {
        let Some((previous, signal)) = self.claim()? else {
            return Ok(None);
        };
        if let Err(err) = notifier.deliver(&signal) {
            self.state
                .restore_last_sent(previous)
                .context("restoring last-sent marker after failed delivery")?;
            return Err(err.context(format!("delivering new message signal for {}", signal.day)));
        }
        Ok(Some(signal))
    }

    /// Marks today as sent and returns the marker it replaced with the signal.
    fn claim(&self) -> Result<Option<(Option<MessageDate>, NewMessageSignal)>, StateError> {
        let now = self.clock.now();
        let threshold = self.state.threshold()?;
        let last_sent = self.state.last_sent()?;
        if !resolver::should_notify_now(now, threshold, last_sent) {
            return Ok(None);
        }
        let day = MessageDate::of(now);
        self.state.set_last_sent(day)?;
        let message = resolver::resolve_current_message(now, &self.catalog, threshold).cloned();
        Ok(Some((last_sent, NewMessageSignal { day, message })))
    }
}

/// Stops a running watch loop when cancelled or dropped.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Sender<()>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(1);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.try_send(());
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Stop after this many polls.
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub ticks: u64,
    pub delivered: u64,
}

/// Polls the gate on the calling thread: once immediately, then every
/// `interval`, until cancelled or out of ticks.
pub fn run_until_cancelled(
    gate: &NotificationGate,
    notifier: &dyn Notifier,
    options: WatchOptions,
    cancel: &CancelToken,
) -> WatchSummary {
    let ticker = tick(options.interval);
    let mut summary = WatchSummary::default();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match gate.deliver_due(notifier) {
            Ok(Some(signal)) => {
                summary.delivered += 1;
                tracing::info!(day = %signal.day, "delivered new message signal");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = ?err, "notification check failed");
            }
        }
        summary.ticks += 1;
        if options.max_ticks.is_some_and(|max| summary.ticks >= max) {
            break;
        }
        select! {
            recv(ticker) -> _ => {}
            recv(cancel.rx) -> _ => break,
        }
    }
    tracing::debug!(ticks = summary.ticks, delivered = summary.delivered, "watch loop stopped");
    summary
}

/// A watch loop on its own thread. Dropping the handle stops it.
pub struct WatcherHandle {
    cancel: CancelHandle,
    thread: Option<JoinHandle<WatchSummary>>,
}

impl WatcherHandle {
    pub fn stop(mut self) -> Result<WatchSummary> {
        self.cancel.cancel();
        let thread = self.thread.take().context("watcher already stopped")?;
        thread
            .join()
            .map_err(|_| anyhow::anyhow!("watcher thread panicked"))
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_watcher(
    gate: NotificationGate,
    notifier: Box<dyn Notifier>,
    options: WatchOptions,
) -> Result<WatcherHandle> {
    let (cancel, token) = cancellation();
    let thread = thread::Builder::new()
        .name("dailymsg-watch".into())
        .spawn(move || run_until_cancelled(&gate, notifier.as_ref(), options, &token))
        .context("spawning notification watcher")?;
    Ok(WatcherHandle {
        cancel,
        thread: Some(thread),
    })
}
