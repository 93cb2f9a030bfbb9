use crate::catalog::Message;
use crate::resolver::{FavoriteSet, FavoriteToggle, NotificationThreshold, OpenedSet};
use crate::state::{StateError, StateStore};

pub struct ActionDispatcher<'a> {
    state: &'a StateStore,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(state: &'a StateStore) -> Self {
        Self { state }
    }

    /// Marks `message` opened and remembers it as the last one shown. Both
    /// writes are attempted; the first failure wins.
    pub fn reveal(&self, message: &Message) -> Result<OpenedSet, StateError> {
        let opened = self.state.record_opened(message).map(|(opened, _)| opened);
        let shown = self.state.set_last_shown(message);
        match (opened, shown) {
            (Ok(opened), Ok(())) => Ok(opened),
            (Err(err), _) | (_, Err(err)) => Err(err),
        }
    }

    pub fn show(&self, message: &Message) -> Result<(), StateError> {
        self.state.set_last_shown(message)
    }

    pub fn toggle_favorite(
        &self,
        message: &Message,
    ) -> Result<(FavoriteSet, FavoriteToggle), StateError> {
        self.state.toggle_favorite(message)
    }

    pub fn set_notification_time(&self, threshold: NotificationThreshold) -> Result<(), StateError> {
        self.state.set_threshold(threshold)
    }

    pub fn reset(&self) -> Result<(), StateError> {
        self.state.reset()
    }
}
