//! Shape of the persisted user state on top of a [`KeyValueStore`].
//!
//! Reads never write: a missing or unreadable value becomes its default and
//! the store is left as it was. Each read-modify-write of a list key holds that
//! key's lock, shared by every clone of the [`StateStore`].

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;

use crate::catalog::{Message, MessageDate};
use crate::resolver::{self, FavoriteSet, FavoriteToggle, MessageSet, NotificationThreshold, OpenedSet};
use crate::storage::{KeyValueStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum StorageKey {
    #[strum(serialize = "notif_hour")]
    NotificationHour,
    #[strum(serialize = "notif_minute")]
    NotificationMinute,
    #[strum(serialize = "discovered_messages")]
    Discovered,
    #[strum(serialize = "app_favorites")]
    Favorites,
    /// Older builds stored favorites here. Read as a fallback, never written.
    #[strum(serialize = "favorites")]
    LegacyFavorites,
    #[strum(serialize = "last_message")]
    LastShown,
    #[strum(serialize = "last_date")]
    LastSent,
}

impl StorageKey {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Keys cleared by a reset. The notification time is a setting and stays.
    pub fn is_user_state(self) -> bool {
        !matches!(self, Self::NotificationHour | Self::NotificationMinute)
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("reading {key}")]
    Read {
        key: &'static str,
        #[source]
        source: StorageError,
    },
    #[error("writing {key}")]
    Write {
        key: &'static str,
        #[source]
        source: StorageError,
    },
    #[error("encoding {key}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Read { key, .. } | Self::Write { key, .. } | Self::Encode { key, .. } => key,
        }
    }
}

/// On-disk form of a message. Dates are kept as raw strings so one bad entry
/// does not discard the whole list.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    content: String,
    date: String,
}

#[derive(Debug, Default)]
struct KeyLocks {
    opened: Mutex<()>,
    favorites: Mutex<()>,
}

#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KeyValueStore>,
    default_threshold: NotificationThreshold,
    locks: Arc<KeyLocks>,
}

impl StateStore {
    pub fn new(store: Arc<dyn KeyValueStore>, default_threshold: NotificationThreshold) -> Self {
        Self {
            store,
            default_threshold,
            locks: Arc::new(KeyLocks::default()),
        }
    }

    pub fn threshold(&self) -> Result<NotificationThreshold, StateError> {
        let hour = self.read(StorageKey::NotificationHour)?;
        let minute = self.read(StorageKey::NotificationMinute)?;
        let (Some(hour), Some(minute)) = (hour, minute) else {
            return Ok(self.default_threshold);
        };
        let parsed = match (hour.trim().parse::<u32>(), minute.trim().parse::<u32>()) {
            (Ok(hour), Ok(minute)) => NotificationThreshold::new(hour, minute).ok(),
            _ => None,
        };
        Ok(parsed.unwrap_or_else(|| {
            tracing::warn!(%hour, %minute, "ignoring corrupt notification time");
            self.default_threshold
        }))
    }

    pub fn set_threshold(&self, threshold: NotificationThreshold) -> Result<(), StateError> {
        self.write(StorageKey::NotificationHour, &threshold.hour().to_string())?;
        self.write(StorageKey::NotificationMinute, &threshold.minute().to_string())
    }

    pub fn opened(&self) -> Result<OpenedSet, StateError> {
        self.read_messages(StorageKey::Discovered)
            .map(Option::unwrap_or_default)
    }

    /// Returns the updated set and whether `message` was new to it.
    pub fn record_opened(&self, message: &Message) -> Result<(OpenedSet, bool), StateError> {
        let _guard = self.locks.opened.lock();
        let mut opened = self.opened()?;
        let added = resolver::record_opened(message, &mut opened);
        if added {
            self.write_messages(StorageKey::Discovered, &opened)?;
        }
        Ok((opened, added))
    }

    /// Canonical key first, then the legacy one.
    pub fn favorites(&self) -> Result<FavoriteSet, StateError> {
        if let Some(favorites) = self.read_messages(StorageKey::Favorites)? {
            return Ok(favorites);
        }
        if let Some(favorites) = self.read_messages(StorageKey::LegacyFavorites)? {
            tracing::debug!(count = favorites.len(), "using favorites from legacy key");
            return Ok(favorites);
        }
        Ok(FavoriteSet::new())
    }

    pub fn toggle_favorite(
        &self,
        message: &Message,
    ) -> Result<(FavoriteSet, FavoriteToggle), StateError> {
        let _guard = self.locks.favorites.lock();
        let mut favorites = self.favorites()?;
        let toggle = resolver::toggle_favorite(message, &mut favorites);
        self.write_messages(StorageKey::Favorites, &favorites)?;
        Ok((favorites, toggle))
    }

    pub fn last_shown(&self) -> Result<Option<Message>, StateError> {
        let key = StorageKey::LastShown;
        let Some(raw) = self.read(key)? else {
            return Ok(None);
        };
        let message = serde_json::from_str::<StoredMessage>(&raw)
            .map_err(|err| err.to_string())
            .and_then(|stored| normalize(stored).map_err(|err| err.to_string()));
        match message {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                tracing::warn!(key = key.name(), %err, "ignoring corrupt last message");
                Ok(None)
            }
        }
    }

    pub fn set_last_shown(&self, message: &Message) -> Result<(), StateError> {
        let key = StorageKey::LastShown;
        let raw = serde_json::to_string(message).map_err(|source| StateError::Encode {
            key: key.name(),
            source,
        })?;
        self.write(key, &raw)
    }

    pub fn last_sent(&self) -> Result<Option<MessageDate>, StateError> {
        let key = StorageKey::LastSent;
        let Some(raw) = self.read(key)? else {
            return Ok(None);
        };
        match raw.parse::<MessageDate>() {
            Ok(date) => Ok(Some(date)),
            Err(err) => {
                tracing::warn!(key = key.name(), %err, "ignoring corrupt last-sent marker");
                Ok(None)
            }
        }
    }

    pub fn set_last_sent(&self, date: MessageDate) -> Result<(), StateError> {
        self.write(StorageKey::LastSent, &date.to_string())
    }

    /// Puts back a marker read earlier with [`StateStore::last_sent`];
    /// `None` removes the key.
    pub fn restore_last_sent(&self, previous: Option<MessageDate>) -> Result<(), StateError> {
        let key = StorageKey::LastSent;
        match previous {
            Some(date) => self.set_last_sent(date),
            None => self.store.remove(key.name()).map_err(|source| StateError::Write {
                key: key.name(),
                source,
            }),
        }
    }

    /// Removes every user-state key, including the legacy favorites key.
    /// Keeps going after a failed removal and reports the first failure.
    pub fn reset(&self) -> Result<(), StateError> {
        let _opened = self.locks.opened.lock();
        let _favorites = self.locks.favorites.lock();
        let mut first_error = None;
        for key in StorageKey::iter().filter(|key| key.is_user_state()) {
            if let Err(source) = self.store.remove(key.name()) {
                tracing::warn!(key = key.name(), error = %source, "failed to clear key");
                first_error.get_or_insert(StateError::Write {
                    key: key.name(),
                    source,
                });
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::info!("cleared opened messages, favorites and markers");
                Ok(())
            }
        }
    }

    pub fn entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.store.entries()
    }

    fn read(&self, key: StorageKey) -> Result<Option<String>, StateError> {
        self.store.get(key.name()).map_err(|source| StateError::Read {
            key: key.name(),
            source,
        })
    }

    fn write(&self, key: StorageKey, value: &str) -> Result<(), StateError> {
        self.store
            .set(key.name(), value)
            .map_err(|source| StateError::Write {
                key: key.name(),
                source,
            })
    }

    /// `None` when the key is absent; a corrupt list reads as empty.
    fn read_messages(&self, key: StorageKey) -> Result<Option<MessageSet>, StateError> {
        let Some(raw) = self.read(key)? else {
            return Ok(None);
        };
        let records = match serde_json::from_str::<Vec<StoredMessage>>(&raw) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(key = key.name(), %err, "discarding corrupt message list");
                return Ok(Some(MessageSet::new()));
            }
        };
        let set = records
            .into_iter()
            .filter_map(|stored| match normalize(stored) {
                Ok(message) => Some(message),
                Err(err) => {
                    tracing::warn!(key = key.name(), %err, "skipping stored message");
                    None
                }
            })
            .collect();
        Ok(Some(set))
    }

    fn write_messages(&self, key: StorageKey, messages: &MessageSet) -> Result<(), StateError> {
        let records: Vec<&Message> = messages.iter().collect();
        let raw = serde_json::to_string(&records).map_err(|source| StateError::Encode {
            key: key.name(),
            source,
        })?;
        self.write(key, &raw)
    }
}

fn normalize(stored: StoredMessage) -> Result<Message, crate::catalog::ParseDateError> {
    let date = stored.date.parse::<MessageDate>()?;
    Ok(Message::new(date, stored.content))
}
