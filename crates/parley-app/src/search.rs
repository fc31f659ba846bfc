//! Search and filter projections.
//!
//! Pure functions from canonical state to displayed subsets. Nothing here
//! mutates the materialized list or the topic cache; clearing a query
//! always restores the exact pre-filter view.

use parley_core::{Message, Topic, TopicStatus};

use crate::{Search, SearchMode};

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// `true` when the message matches the search settings.
pub fn matches(message: &Message, search: &Search) -> bool {
    if search.is_empty() {
        return true;
    }
    match search.mode {
        SearchMode::Message => contains_ignore_case(&message.content, &search.query),
        SearchMode::Tag => message.tags.iter().any(|t| contains_ignore_case(t, &search.query)),
    }
}

/// Project the materialized list into the displayed subset, preserving
/// order and identity.
pub fn visible<'a>(messages: &'a [Message], search: &Search) -> Vec<&'a Message> {
    messages.iter().filter(|m| matches(m, search)).collect()
}

/// Messages in send order for presentation. The canonical list keeps
/// arrival order; this sorts a projection, never the list itself.
/// Messages without a timestamp keep their relative arrival order.
pub fn sorted_for_display<'a>(messages: &'a [Message], search: &Search) -> Vec<&'a Message> {
    let mut shown = visible(messages, search);
    shown.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
    shown
}

/// Topics matching an optional status and a title query
/// (case-insensitive substring; empty matches all).
pub fn filter_topics<'a>(
    topics: &'a [Topic],
    query: &str,
    status: Option<TopicStatus>,
) -> Vec<&'a Topic> {
    topics
        .iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .filter(|t| query.is_empty() || contains_ignore_case(&t.title, query))
        .collect()
}

/// Order topics most-recently-active first; topics with no messages sort
/// last, in their incoming order.
pub fn sort_topics(topics: &mut [Topic]) {
    topics.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}
