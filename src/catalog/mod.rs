use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};

use crate::resolver::{self, NotificationThreshold};

const EMBEDDED_CATALOG: &str = include_str!("../../assets/messages.json");
const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid message date {input:?} (expected YYYY-MM-DD)")]
pub struct ParseDateError {
    input: String,
}

/// Calendar day a message belongs to. This is the identity of a message:
/// two messages with the same date are the same message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    SerializeDisplay,
    DeserializeFromStr,
)]
pub struct MessageDate(Date);

impl MessageDate {
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    /// Calendar day of a wall-clock instant.
    pub fn of(instant: PrimitiveDateTime) -> Self {
        Self(instant.date())
    }

    pub fn date(self) -> Date {
        self.0
    }

    pub fn at(self, time: Time) -> PrimitiveDateTime {
        self.0.with_time(time)
    }
}

impl From<Date> for MessageDate {
    fn from(date: Date) -> Self {
        Self(date)
    }
}

impl fmt::Display for MessageDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day()
        )
    }
}

impl FromStr for MessageDate {
    type Err = ParseDateError;

    /// Accepts a bare `YYYY-MM-DD` as well as a full timestamp
    /// (`2024-01-02T23:00:00.000Z`, `2024-01-02 08:15`); anything after the
    /// calendar day is dropped without applying the offset.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let day = trimmed
            .split(|c: char| c == 'T' || c == 't' || c == ' ')
            .next()
            .unwrap_or(trimmed);
        Date::parse(day, DATE_FORMAT)
            .map(Self)
            .map_err(|_| ParseDateError {
                input: input.to_owned(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub date: MessageDate,
}

impl Message {
    pub fn new(date: MessageDate, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            date,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading catalog {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing catalog json")]
    Json(#[from] serde_json::Error),
    #[error("catalog entry #{index} has an invalid date")]
    Date {
        index: usize,
        #[source]
        source: ParseDateError,
    },
}

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    date: String,
    content: String,
}

/// The fixed list of dated messages, sorted by date with one entry per day.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Message>,
}

impl Catalog {
    /// Sorts by date; when a day appears more than once the first entry wins.
    pub fn new(mut entries: Vec<Message>) -> Self {
        entries.sort_by_key(|message| message.date);
        let before = entries.len();
        entries.dedup_by_key(|message| message.date);
        if entries.len() != before {
            tracing::warn!(
                dropped = before - entries.len(),
                "catalog contains duplicate dates; keeping the first entry for each day"
            );
        }
        Self { entries }
    }

    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let records: Vec<CatalogRecord> = serde_json::from_str(raw)?;
        let entries = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let date = record
                    .date
                    .parse::<MessageDate>()
                    .map_err(|source| CatalogError::Date { index, source })?;
                Ok(Message::new(date, record.content))
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, date: MessageDate) -> Option<&Message> {
        self.entries
            .binary_search_by_key(&date, |message| message.date)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Whether the message for `date` exists and has been released at `now`.
    pub fn is_available(
        &self,
        date: MessageDate,
        now: PrimitiveDateTime,
        threshold: NotificationThreshold,
    ) -> bool {
        self.get(date).is_some() && resolver::is_released(date, now, threshold)
    }
}
