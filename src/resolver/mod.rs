//! Which message is "today's", which ones were missed, and when the daily
//! signal is due. Everything here is a pure function of its arguments.

use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use time::{Date, Duration, PrimitiveDateTime, Time};

use crate::catalog::{Catalog, Message, MessageDate};

mod sets;

pub use sets::{FavoriteSet, MessageSet, OpenedSet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseThresholdError {
    #[error("invalid notification time {0:?} (expected HH:MM)")]
    Format(String),
    #[error("notification time {hour}:{minute:02} is out of range")]
    OutOfRange { hour: u32, minute: u32 },
}

/// Time of day at which the day's message unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct NotificationThreshold {
    hour: u8,
    minute: u8,
}

impl NotificationThreshold {
    pub const DEFAULT: Self = Self { hour: 9, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Result<Self, ParseThresholdError> {
        if hour > 23 || minute > 59 {
            return Err(ParseThresholdError::OutOfRange { hour, minute });
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn time(&self) -> Time {
        Time::from_hms(self.hour, self.minute, 0).unwrap_or(Time::MIDNIGHT)
    }
}

impl Default for NotificationThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for NotificationThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for NotificationThreshold {
    type Err = ParseThresholdError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let format_err = || ParseThresholdError::Format(input.to_owned());
        let (hour, minute) = input
            .trim()
            .split_once(|c: char| c == ':' || c == 'h')
            .ok_or_else(format_err)?;
        let hour = hour.trim().parse::<u32>().map_err(|_| format_err())?;
        let minute = match minute.trim() {
            "" => 0,
            raw => raw.parse::<u32>().map_err(|_| format_err())?,
        };
        Self::new(hour, minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteToggle {
    Added,
    Removed,
}

pub fn threshold_instant(day: Date, threshold: NotificationThreshold) -> PrimitiveDateTime {
    day.with_time(threshold.time())
}

/// Past days are always released; today's message only once the threshold
/// has passed; future days never.
pub fn is_released(date: MessageDate, now: PrimitiveDateTime, threshold: NotificationThreshold) -> bool {
    let today = now.date();
    let day = date.date();
    day < today || (day == today && now >= threshold_instant(today, threshold))
}

/// The most recent released message, if any.
pub fn resolve_current_message<'c>(
    now: PrimitiveDateTime,
    catalog: &'c Catalog,
    threshold: NotificationThreshold,
) -> Option<&'c Message> {
    let entries = catalog.entries();
    // Release is monotone in the date, so released entries form a prefix.
    let released = entries.partition_point(|message| is_released(message.date, now, threshold));
    let current = released.checked_sub(1).map(|index| &entries[index]);
    tracing::debug!(
        %now,
        %threshold,
        current = ?current.map(|message| message.date.to_string()),
        "resolved current message"
    );
    current
}

pub fn is_opened(message: &Message, opened: &OpenedSet) -> bool {
    opened.contains(message.date)
}

/// Unopened messages from days before today, newest first.
pub fn missed_messages<'c>(
    now: PrimitiveDateTime,
    catalog: &'c Catalog,
    opened: &OpenedSet,
) -> Vec<&'c Message> {
    let today = MessageDate::of(now);
    catalog
        .iter()
        .rev()
        .filter(|message| message.date < today && !opened.contains(message.date))
        .collect()
}

/// Returns whether the message was newly recorded.
pub fn record_opened(message: &Message, opened: &mut OpenedSet) -> bool {
    opened.insert(message.clone())
}

pub fn toggle_favorite(message: &Message, favorites: &mut FavoriteSet) -> FavoriteToggle {
    if favorites.remove(message.date).is_some() {
        FavoriteToggle::Removed
    } else {
        favorites.insert(message.clone());
        FavoriteToggle::Added
    }
}

/// Level-triggered: true on the first check after the threshold on any day
/// whose date differs from `last_sent`. The caller records the day to keep it
/// from firing again.
pub fn should_notify_now(
    now: PrimitiveDateTime,
    threshold: NotificationThreshold,
    last_sent: Option<MessageDate>,
) -> bool {
    let today = MessageDate::of(now);
    last_sent != Some(today) && now >= threshold_instant(now.date(), threshold)
}

/// Next threshold strictly after `now`: today's if still ahead, else tomorrow's.
pub fn next_threshold_after(now: PrimitiveDateTime, threshold: NotificationThreshold) -> PrimitiveDateTime {
    let today = threshold_instant(now.date(), threshold);
    if today > now {
        return today;
    }
    match now.date().next_day() {
        Some(tomorrow) => threshold_instant(tomorrow, threshold),
        None => today,
    }
}

pub fn countdown(now: PrimitiveDateTime, threshold: NotificationThreshold) -> Duration {
    next_threshold_after(now, threshold) - now
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            Message::new("2024-01-01".parse().expect("date"), "A"),
            Message::new("2024-01-02".parse().expect("date"), "B"),
        ])
    }

    fn nine() -> NotificationThreshold {
        NotificationThreshold::DEFAULT
    }

    fn content(message: Option<&Message>) -> Option<&str> {
        message.map(|m| m.content.as_str())
    }

    #[test]
    fn today_is_locked_before_threshold() {
        let catalog = catalog();
        let current = resolve_current_message(datetime!(2024-01-02 08:00), &catalog, nine());
        assert_eq!(content(current), Some("A"));
        let current = resolve_current_message(datetime!(2024-01-02 08:59:59), &catalog, nine());
        assert_eq!(content(current), Some("A"));
    }

    #[test]
    fn today_unlocks_at_threshold() {
        let catalog = catalog();
        let current = resolve_current_message(datetime!(2024-01-02 09:00), &catalog, nine());
        assert_eq!(content(current), Some("B"));
        let current = resolve_current_message(datetime!(2024-01-02 10:00), &catalog, nine());
        assert_eq!(content(current), Some("B"));
    }

    #[test]
    fn nothing_before_first_release() {
        let catalog = catalog();
        assert!(resolve_current_message(datetime!(2024-01-01 08:00), &catalog, nine()).is_none());
        assert!(resolve_current_message(datetime!(2023-06-01 12:00), &catalog, nine()).is_none());
        assert!(resolve_current_message(datetime!(2024-01-01 12:00), &Catalog::default(), nine()).is_none());
    }

    #[test]
    fn past_entries_ignore_threshold() -> anyhow::Result<()> {
        let catalog = catalog();
        let late = NotificationThreshold::new(23, 59)?;
        let current = resolve_current_message(datetime!(2024-01-05 00:00), &catalog, late);
        assert_eq!(content(current), Some("B"));
        Ok(())
    }

    #[test]
    fn resolution_is_repeatable() {
        let catalog = catalog();
        let now = datetime!(2024-01-02 10:00);
        let first = resolve_current_message(now, &catalog, nine()).cloned();
        let second = resolve_current_message(now, &catalog, nine()).cloned();
        assert_eq!(first, second);
    }

    #[test]
    fn missed_skips_today_future_and_opened() {
        let catalog = catalog();
        let mut opened = OpenedSet::new();
        record_opened(&catalog.entries()[0], &mut opened);

        let missed = missed_messages(datetime!(2024-01-03 00:00), &catalog, &opened);
        let dates: Vec<_> = missed.iter().map(|m| m.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-01-02"]);
        assert_eq!(missed[0].content, "B");

        let missed = missed_messages(datetime!(2024-01-02 23:00), &catalog, &OpenedSet::new());
        let dates: Vec<_> = missed.iter().map(|m| m.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-01-01"]);
    }

    #[test]
    fn missed_is_newest_first() {
        let catalog = catalog();
        let missed = missed_messages(datetime!(2024-02-01 12:00), &catalog, &OpenedSet::new());
        let contents: Vec<_> = missed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["B", "A"]);
    }

    #[test]
    fn record_opened_is_idempotent() {
        let catalog = catalog();
        let message = &catalog.entries()[1];
        let mut once = OpenedSet::new();
        assert!(record_opened(message, &mut once));

        let mut many = OpenedSet::new();
        for _ in 0..5 {
            record_opened(message, &mut many);
        }
        assert!(!record_opened(message, &mut many));
        assert_eq!(once, many);
        assert_eq!(many.len(), 1);
        assert!(is_opened(message, &many));
        assert!(!is_opened(&catalog.entries()[0], &many));
    }

    #[test]
    fn toggle_favorite_twice_restores_set() {
        let catalog = catalog();
        let mut favorites = FavoriteSet::new();
        toggle_favorite(&catalog.entries()[0], &mut favorites);
        let original = favorites.clone();

        let message = &catalog.entries()[1];
        assert_eq!(toggle_favorite(message, &mut favorites), FavoriteToggle::Added);
        assert!(favorites.contains(message.date));
        assert_eq!(toggle_favorite(message, &mut favorites), FavoriteToggle::Removed);
        assert_eq!(favorites, original);

        assert_eq!(toggle_favorite(&catalog.entries()[0], &mut favorites), FavoriteToggle::Removed);
        assert_eq!(toggle_favorite(&catalog.entries()[0], &mut favorites), FavoriteToggle::Added);
        assert_eq!(favorites, original);
    }

    #[test]
    fn toggle_matches_by_date_not_content() -> anyhow::Result<()> {
        let mut favorites = FavoriteSet::new();
        favorites.insert(Message::new("2024-01-02".parse()?, "old wording"));
        let current = Message::new("2024-01-02T12:00:00Z".parse()?, "B");
        assert_eq!(toggle_favorite(&current, &mut favorites), FavoriteToggle::Removed);
        assert!(favorites.is_empty());
        Ok(())
    }

    #[test]
    fn notify_once_per_day_after_threshold() -> anyhow::Result<()> {
        let sent: MessageDate = "2024-01-02".parse()?;
        assert!(!should_notify_now(datetime!(2024-01-02 09:30), nine(), Some(sent)));
        assert!(should_notify_now(datetime!(2024-01-03 09:30), nine(), Some(sent)));
        assert!(!should_notify_now(datetime!(2024-01-03 08:59), nine(), Some(sent)));
        assert!(should_notify_now(datetime!(2024-01-03 23:59), nine(), Some(sent)));
        assert!(should_notify_now(datetime!(2024-01-03 09:00), nine(), None));
        Ok(())
    }

    #[test]
    fn countdown_rolls_over_to_tomorrow() {
        assert_eq!(
            next_threshold_after(datetime!(2024-01-02 08:00), nine()),
            datetime!(2024-01-02 09:00)
        );
        assert_eq!(
            next_threshold_after(datetime!(2024-01-02 09:00), nine()),
            datetime!(2024-01-03 09:00)
        );
        assert_eq!(countdown(datetime!(2024-01-02 08:30), nine()), Duration::minutes(30));
        assert_eq!(countdown(datetime!(2024-01-02 10:00), nine()), Duration::hours(23));
    }

    #[test]
    fn threshold_parsing() -> anyhow::Result<()> {
        assert_eq!("9:00".parse::<NotificationThreshold>()?, nine());
        assert_eq!("07:45".parse::<NotificationThreshold>()?, NotificationThreshold::new(7, 45)?);
        assert_eq!("21h30".parse::<NotificationThreshold>()?, NotificationThreshold::new(21, 30)?);
        assert_eq!("6h".parse::<NotificationThreshold>()?, NotificationThreshold::new(6, 0)?);
        assert_eq!(
            "24:00".parse::<NotificationThreshold>(),
            Err(ParseThresholdError::OutOfRange { hour: 24, minute: 0 })
        );
        assert!(matches!(
            "noon".parse::<NotificationThreshold>(),
            Err(ParseThresholdError::Format(_))
        ));
        assert_eq!(NotificationThreshold::new(7, 5)?.to_string(), "07:05");
        Ok(())
    }
}
