use indexmap::IndexMap;

use crate::catalog::{Message, MessageDate};

/// Messages keyed by their date, remembering the order they were added in.
///
/// Equality ignores insertion order and content: two sets are equal when they
/// hold the same dates.
#[derive(Debug, Clone, Default)]
pub struct MessageSet {
    entries: IndexMap<MessageDate, Message>,
}

impl PartialEq for MessageSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.keys().all(|date| other.entries.contains_key(date))
    }
}

impl Eq for MessageSet {}

/// Messages the user has revealed.
pub type OpenedSet = MessageSet;
/// Messages the user starred.
pub type FavoriteSet = MessageSet;

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, date: MessageDate) -> bool {
        self.entries.contains_key(&date)
    }

    pub fn get(&self, date: MessageDate) -> Option<&Message> {
        self.entries.get(&date)
    }

    /// Appends `message` unless its date is already present. Returns whether
    /// the set changed.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.entries.contains_key(&message.date) {
            return false;
        }
        self.entries.insert(message.date, message);
        true
    }

    pub fn remove(&mut self, date: MessageDate) -> Option<Message> {
        self.entries.shift_remove(&date)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insertion order, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.entries.values()
    }

    pub fn latest_added(&self, limit: usize) -> Vec<Message> {
        self.iter().rev().take(limit).cloned().collect()
    }

    pub fn newest_dates_first(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.iter().cloned().collect();
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages
    }
}

impl FromIterator<Message> for MessageSet {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut set = MessageSet::new();
        for message in iter {
            set.insert(message);
        }
        set
    }
}
