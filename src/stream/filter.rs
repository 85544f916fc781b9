//! Record filters an application attaches to a fetch.
//!
//! A [`Filter`] matches when all of its conditions match, a record passes
//! when any filter matches. Everything is owned so filters can be compared
//! when the application changes them mid stream.

use bytes::Bytes;

use crate::protocol::record::MessageHeader;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Key equals, `None` matches a null key.
    Key(Option<Bytes>),
    /// Some header with this name has this value.
    Header { name: Bytes, value: Option<Bytes> },
    /// The values of every header with this name, in order, match the
    /// pattern.
    Headers { name: Bytes, values: Vec<ValueMatch> },
    Not(Box<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueMatch {
    Value(Bytes),
    /// Any one value.
    Skip,
    /// Any run of values, including none.
    SkipMany,
}

impl Filter {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Filter { conditions }
    }

    pub fn matches(&self, key: Option<&Bytes>, headers: &[MessageHeader]) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.matches(key, headers))
    }
}

impl Condition {
    pub fn matches(&self, key: Option<&Bytes>, headers: &[MessageHeader]) -> bool {
        match self {
            Condition::Key(expected) => expected.as_ref() == key,
            Condition::Header { name, value } => headers
                .iter()
                .any(|header| &header.key == name && &header.value == value),
            Condition::Headers { name, values } => {
                let actual: Vec<&Bytes> = headers
                    .iter()
                    .filter(|header| &header.key == name)
                    .filter_map(|header| header.value.as_ref())
                    .collect();
                matches_values(values, &actual)
            }
            Condition::Not(condition) => !condition.matches(key, headers),
        }
    }
}

fn matches_values(pattern: &[ValueMatch], actual: &[&Bytes]) -> bool {
    match pattern.split_first() {
        None => actual.is_empty(),
        Some((ValueMatch::SkipMany, rest)) => {
            (0..=actual.len()).any(|skipped| matches_values(rest, &actual[skipped..]))
        }
        Some((ValueMatch::Skip, rest)) => {
            !actual.is_empty() && matches_values(rest, &actual[1..])
        }
        Some((ValueMatch::Value(value), rest)) => {
            actual.first().map_or(false, |first| *first == value)
                && matches_values(rest, &actual[1..])
        }
    }
}

/// Bit per filter the record matched, all bits when there are no filters.
/// Returns `0` when the record should not be delivered.
pub fn evaluate(filters: &[Filter], key: Option<&Bytes>, headers: &[MessageHeader]) -> i64 {
    if filters.is_empty() {
        return -1;
    }

    filters
        .iter()
        .take(64)
        .enumerate()
        .filter(|(_, filter)| filter.matches(key, headers))
        .fold(0i64, |bits, (index, _)| bits | (1 << index))
}
