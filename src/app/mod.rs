use std::sync::Arc;

use thiserror::Error;
use time::{Duration, PrimitiveDateTime};

use crate::catalog::{Catalog, Message, MessageDate};
use crate::clock::Clock;
use crate::config::HomeOptions;
use crate::resolver::{self, FavoriteSet, FavoriteToggle, NotificationThreshold, OpenedSet};
use crate::state::{StateError, StateStore};

mod actions;

pub use actions::ActionDispatcher;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no message is scheduled for {0}")]
    UnknownDate(MessageDate),
    #[error("the message for {0} is not available yet")]
    NotReleased(MessageDate),
    #[error("reset was not confirmed")]
    Unconfirmed,
    #[error("loading saved state")]
    Load(#[source] StateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetConfirmation {
    Confirmed,
    Declined,
}

/// What a user action produced. The action has already taken effect in the
/// session; `persist_error` is set when saving it failed.
#[derive(Debug)]
#[must_use]
pub struct ActionOutcome<T> {
    pub value: T,
    pub persist_error: Option<StateError>,
}

impl<T> ActionOutcome<T> {
    fn new(value: T, saved: Result<(), StateError>) -> Self {
        Self {
            value,
            persist_error: saved.err(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.persist_error.is_none()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ActionOutcome<U> {
        ActionOutcome {
            value: f(self.value),
            persist_error: self.persist_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyMessage {
    pub message: Message,
    pub opened: bool,
    pub favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    pub message: Message,
    pub favorite: bool,
    pub newly_opened: bool,
}

#[derive(Debug, Clone)]
pub struct HomeView {
    pub now: PrimitiveDateTime,
    pub threshold: NotificationThreshold,
    pub countdown: Duration,
    pub current: Option<DailyMessage>,
    pub missed: Vec<Message>,
    pub favorites_preview: Vec<Message>,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    threshold: NotificationThreshold,
    opened: OpenedSet,
    favorites: FavoriteSet,
}

/// Host-side view of the daily message: persisted state is loaded on focus,
/// kept in memory, and written back as the user acts.
pub struct DailySession {
    catalog: Arc<Catalog>,
    state: StateStore,
    clock: Arc<dyn Clock>,
    options: HomeOptions,
    snapshot: Snapshot,
}

impl DailySession {
    pub fn new(
        catalog: Arc<Catalog>,
        state: StateStore,
        clock: Arc<dyn Clock>,
        options: HomeOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            catalog,
            state,
            clock,
            options,
            snapshot: Snapshot::default(),
        };
        session.reload()?;
        Ok(session)
    }

    pub fn threshold(&self) -> NotificationThreshold {
        self.snapshot.threshold
    }

    /// Reloads persisted state and renders the home view from it.
    pub fn focus(&mut self) -> Result<HomeView, SessionError> {
        self.reload()?;
        Ok(self.home())
    }

    pub fn home(&self) -> HomeView {
        let now = self.clock.now();
        let threshold = self.snapshot.threshold;
        HomeView {
            now,
            threshold,
            countdown: resolver::countdown(now, threshold),
            current: self.current_at(now),
            missed: self.missed_at(now),
            favorites_preview: self
                .snapshot
                .favorites
                .latest_added(self.options.favorites_preview),
        }
    }

    pub fn current(&self) -> Option<DailyMessage> {
        self.current_at(self.clock.now())
    }

    /// Reveals the current message, if one has been released.
    pub fn open_current(&mut self) -> ActionOutcome<Option<OpenedMessage>> {
        let now = self.clock.now();
        let current = resolver::resolve_current_message(now, &self.catalog, self.snapshot.threshold)
            .cloned();
        match current {
            Some(message) => self.reveal(message).map(Some),
            None => ActionOutcome::new(None, Ok(())),
        }
    }

    /// Reveals a specific released message, e.g. one picked from the missed list.
    pub fn open_date(
        &mut self,
        date: MessageDate,
    ) -> Result<ActionOutcome<OpenedMessage>, SessionError> {
        let message = self.released(date)?.clone();
        Ok(self.reveal(message))
    }

    /// Displays a released message again without marking it opened.
    pub fn show(&mut self, date: MessageDate) -> Result<ActionOutcome<DailyMessage>, SessionError> {
        let message = self.released(date)?.clone();
        let saved = ActionDispatcher::new(&self.state).show(&message);
        Ok(ActionOutcome::new(self.describe(&message), saved))
    }

    pub fn last_shown(&self) -> Result<Option<DailyMessage>, SessionError> {
        let message = self.state.last_shown().map_err(SessionError::Load)?;
        Ok(message.map(|message| self.describe(&message)))
    }

    /// A favorite can always be removed, even when its date has left the
    /// catalog; adding one requires a released message.
    pub fn toggle_favorite(
        &mut self,
        date: MessageDate,
    ) -> Result<ActionOutcome<FavoriteToggle>, SessionError> {
        let message = match self.snapshot.favorites.get(date) {
            Some(message) => message.clone(),
            None => self.released(date)?.clone(),
        };
        let local = resolver::toggle_favorite(&message, &mut self.snapshot.favorites);
        let outcome = match ActionDispatcher::new(&self.state).toggle_favorite(&message) {
            Ok((favorites, toggle)) => {
                self.snapshot.favorites = favorites;
                ActionOutcome::new(toggle, Ok(()))
            }
            Err(err) => {
                tracing::warn!(%date, error = %err, "favorite change not saved");
                ActionOutcome::new(local, Err(err))
            }
        };
        Ok(outcome)
    }

    /// Opened messages, most recently opened first.
    pub fn discovered(&self) -> Vec<Message> {
        self.snapshot.opened.latest_added(self.snapshot.opened.len())
    }

    /// Favorites, newest date first.
    pub fn favorites(&self) -> Vec<Message> {
        self.snapshot.favorites.newest_dates_first()
    }

    pub fn missed(&self) -> Vec<Message> {
        self.missed_at(self.clock.now())
    }

    pub fn set_notification_time(
        &mut self,
        threshold: NotificationThreshold,
    ) -> ActionOutcome<NotificationThreshold> {
        self.snapshot.threshold = threshold;
        let saved = ActionDispatcher::new(&self.state).set_notification_time(threshold);
        ActionOutcome::new(threshold, saved)
    }

    pub fn reset(
        &mut self,
        confirmation: ResetConfirmation,
    ) -> Result<ActionOutcome<()>, SessionError> {
        if confirmation != ResetConfirmation::Confirmed {
            return Err(SessionError::Unconfirmed);
        }
        self.snapshot.opened = OpenedSet::new();
        self.snapshot.favorites = FavoriteSet::new();
        let saved = ActionDispatcher::new(&self.state).reset();
        Ok(ActionOutcome::new((), saved))
    }

    fn reload(&mut self) -> Result<(), SessionError> {
        let threshold = self.state.threshold().map_err(SessionError::Load)?;
        let opened = self.state.opened().map_err(SessionError::Load)?;
        let favorites = self.state.favorites().map_err(SessionError::Load)?;
        self.snapshot = Snapshot {
            threshold,
            opened,
            favorites,
        };
        Ok(())
    }

    fn reveal(&mut self, message: Message) -> ActionOutcome<OpenedMessage> {
        let newly_opened = resolver::record_opened(&message, &mut self.snapshot.opened);
        let saved = ActionDispatcher::new(&self.state)
            .reveal(&message)
            .map(|opened| self.snapshot.opened = opened);
        if let Err(err) = &saved {
            tracing::warn!(date = %message.date, error = %err, "opened message not saved");
        }
        let favorite = self.snapshot.favorites.contains(message.date);
        ActionOutcome::new(
            OpenedMessage {
                message,
                favorite,
                newly_opened,
            },
            saved,
        )
    }

    fn released(&self, date: MessageDate) -> Result<&Message, SessionError> {
        let message = self
            .catalog
            .get(date)
            .ok_or(SessionError::UnknownDate(date))?;
        if !resolver::is_released(date, self.clock.now(), self.snapshot.threshold) {
            return Err(SessionError::NotReleased(date));
        }
        Ok(message)
    }

    fn current_at(&self, now: PrimitiveDateTime) -> Option<DailyMessage> {
        resolver::resolve_current_message(now, &self.catalog, self.snapshot.threshold)
            .map(|message| self.describe(message))
    }

    fn missed_at(&self, now: PrimitiveDateTime) -> Vec<Message> {
        resolver::missed_messages(now, &self.catalog, &self.snapshot.opened)
            .into_iter()
            .cloned()
            .collect()
    }

    fn describe(&self, message: &Message) -> DailyMessage {
        DailyMessage {
            message: message.clone(),
            opened: resolver::is_opened(message, &self.snapshot.opened),
            favorite: self.snapshot.favorites.contains(message.date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::{KeyValueStore, MemoryStore};
    use assert_matches::assert_matches;
    use time::macros::datetime;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        session: DailySession,
    }

    fn catalog() -> Catalog {
        Catalog::new(
            ["A", "B", "C", "D", "E", "F"]
                .into_iter()
                .enumerate()
                .map(|(offset, content)| {
                    let date = format!("2024-01-{:02}", offset + 1);
                    Message::new(date.parse().expect("valid date"), content)
                })
                .collect(),
        )
    }

    fn fixture(now: PrimitiveDateTime) -> anyhow::Result<Fixture> {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let state = StateStore::new(store.clone(), NotificationThreshold::DEFAULT);
        let session = DailySession::new(
            Arc::new(catalog()),
            state,
            clock.clone(),
            HomeOptions::default(),
        )?;
        Ok(Fixture {
            store,
            clock,
            session,
        })
    }

    fn date(raw: &str) -> MessageDate {
        raw.parse().expect("valid date")
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn home_waits_for_threshold() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 08:00))?;
        let home = fx.session.focus()?;
        assert_eq!(home.current.map(|c| c.message.content), Some("B".to_string()));
        assert_eq!(home.countdown, Duration::hours(1));
        assert_eq!(contents(&home.missed), vec!["B", "A"]);

        fx.clock.set(datetime!(2024-01-03 09:00));
        let home = fx.session.focus()?;
        let current = home.current.expect("today's message");
        assert_eq!(current.message.content, "C");
        assert!(!current.opened);
        assert!(!current.favorite);
        assert_eq!(fx.session.current(), Some(current));
        assert_eq!(home.countdown, Duration::hours(24));
        Ok(())
    }

    #[test]
    fn open_current_records_once_and_sets_last_shown() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 10:00))?;
        let outcome = fx.session.open_current();
        assert!(outcome.is_persisted());
        let opened = outcome.value.expect("message available");
        assert_eq!(opened.message.content, "C");
        assert!(opened.newly_opened);

        let again = fx.session.open_current().value.expect("message available");
        assert!(!again.newly_opened);

        assert_eq!(fx.session.discovered().len(), 1);
        let last = fx.session.last_shown()?.expect("last shown");
        assert_eq!(last.message.content, "C");
        assert!(last.opened);
        assert!(fx.session.focus()?.current.expect("current").opened);
        Ok(())
    }

    #[test]
    fn open_current_before_catalog_starts_is_nothing() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2023-12-31 12:00))?;
        let outcome = fx.session.open_current();
        assert!(outcome.value.is_none());
        assert!(fx.store.entries()?.is_empty());
        Ok(())
    }

    #[test]
    fn open_date_validates_and_clears_missed() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 08:00))?;
        assert_matches!(
            fx.session.open_date(date("2024-01-03")),
            Err(SessionError::NotReleased(_))
        );
        assert_matches!(
            fx.session.open_date(date("2023-12-01")),
            Err(SessionError::UnknownDate(_))
        );

        let opened = fx.session.open_date(date("2024-01-01"))?;
        assert_eq!(opened.value.message.content, "A");
        assert_eq!(contents(&fx.session.missed()), vec!["B"]);
        Ok(())
    }

    #[test]
    fn show_does_not_mark_opened() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 10:00))?;
        let shown = fx.session.show(date("2024-01-02"))?;
        assert!(!shown.value.opened);
        assert!(fx.session.discovered().is_empty());
        assert_eq!(
            fx.session.last_shown()?.map(|m| m.message.content),
            Some("B".to_string())
        );
        Ok(())
    }

    #[test]
    fn favorites_toggle_and_preview() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-06 10:00))?;
        for day in ["2024-01-02", "2024-01-05", "2024-01-01", "2024-01-04", "2024-01-03"] {
            let outcome = fx.session.toggle_favorite(date(day))?;
            assert_eq!(outcome.value, FavoriteToggle::Added);
        }
        let home = fx.session.focus()?;
        assert_eq!(contents(&home.favorites_preview), vec!["C", "D", "A", "E"]);
        assert_eq!(contents(&fx.session.favorites()), vec!["E", "D", "C", "B", "A"]);

        let outcome = fx.session.toggle_favorite(date("2024-01-05"))?;
        assert_eq!(outcome.value, FavoriteToggle::Removed);
        assert_eq!(contents(&fx.session.favorites()), vec!["D", "C", "B", "A"]);
        assert_matches!(
            fx.session.toggle_favorite(date("2024-01-07")),
            Err(SessionError::UnknownDate(_))
        );
        Ok(())
    }

    #[test]
    fn stale_favorite_can_still_be_removed() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 10:00))?;
        fx.store.set(
            "app_favorites",
            r#"[{"content": "gone", "date": "2023-06-01"}]"#,
        )?;
        fx.session.focus()?;
        let outcome = fx.session.toggle_favorite(date("2023-06-01"))?;
        assert_eq!(outcome.value, FavoriteToggle::Removed);
        assert!(fx.session.favorites().is_empty());
        Ok(())
    }

    #[test]
    fn failed_write_keeps_memory_until_next_focus() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 10:00))?;
        fx.store.set_read_only(true);

        let outcome = fx.session.toggle_favorite(date("2024-01-02"))?;
        assert_eq!(outcome.value, FavoriteToggle::Added);
        assert_matches!(outcome.persist_error, Some(StateError::Write { .. }));
        assert_eq!(contents(&fx.session.favorites()), vec!["B"]);

        let opened = fx.session.open_current();
        assert!(!opened.is_persisted());
        assert_eq!(fx.session.discovered().len(), 1);

        fx.session.focus()?;
        assert!(fx.session.favorites().is_empty());
        assert!(fx.session.discovered().is_empty());
        Ok(())
    }

    #[test]
    fn reset_needs_confirmation_and_keeps_notification_time() -> anyhow::Result<()> {
        let mut fx = fixture(datetime!(2024-01-03 10:00))?;
        let late = NotificationThreshold::new(11, 0)?;
        assert!(fx.session.set_notification_time(late).is_persisted());
        let _ = fx.session.open_current();
        let _ = fx.session.toggle_favorite(date("2024-01-01"))?;

        assert_matches!(
            fx.session.reset(ResetConfirmation::Declined),
            Err(SessionError::Unconfirmed)
        );
        assert_eq!(fx.session.discovered().len(), 1);

        assert!(fx.session.reset(ResetConfirmation::Confirmed)?.is_persisted());
        let home = fx.session.focus()?;
        assert!(fx.session.discovered().is_empty());
        assert!(fx.session.favorites().is_empty());
        assert!(fx.session.last_shown()?.is_none());
        assert_eq!(home.threshold, late);
        // 10:00 is before the new 11:00 threshold, so yesterday's message is current.
        assert_eq!(home.current.map(|c| c.message.content), Some("B".to_string()));
        Ok(())
    }
}
