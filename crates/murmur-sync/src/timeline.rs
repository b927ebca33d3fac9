//! Render-side grouping derived from a room's message list.
//!
//! The store owns ordering; this only decides where date separators go and
//! which rows start a visual group (new sender, long pause, or new day).

use std::time::Duration;

use chrono::{NaiveDate, TimeZone};

use murmur_types::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineItem {
    DateSeparator(NaiveDate),
    Message { index: usize, first_in_group: bool },
}

/// Lay out `messages` with calendar days taken in `tz`.
pub fn layout<Tz: TimeZone>(messages: &[Message], gap: Duration, tz: &Tz) -> Vec<TimelineItem> {
    let gap = chrono::Duration::from_std(gap).unwrap_or(chrono::Duration::MAX);
    let mut items = Vec::with_capacity(messages.len() + 4);
    let mut previous: Option<(&Message, NaiveDate)> = None;

    for (index, message) in messages.iter().enumerate() {
        let day = message.created_at.with_timezone(tz).date_naive();
        let new_day = previous.is_none_or(|(_, prev_day)| prev_day != day);
        if new_day {
            items.push(TimelineItem::DateSeparator(day));
        }

        let first_in_group = match previous {
            None => true,
            Some(_) if new_day => true,
            Some((prev, _)) => {
                prev.sender_id != message.sender_id || message.created_at - prev.created_at > gap
            }
        };
        items.push(TimelineItem::Message {
            index,
            first_in_group,
        });
        previous = Some((message, day));
    }
    items
}
