use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// An opaque token naming one listing, e.g. the numeric part of `/rooms/12345`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    /// Wraps a raw token. Empty or blank tokens are never valid identifiers.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == raw.len() {
            Some(Self(raw))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ListingId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ListingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The deduplicated set of identifiers collected during traversal.
///
/// Iteration order is the identifiers' sort order, so batch composition is
/// deterministic for a given set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSet {
    ids: BTreeSet<ListingId>,
}

impl ListingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, returning `false` if it was already present.
    pub fn insert(&mut self, id: ListingId) -> bool {
        self.ids.insert(id)
    }

    /// Merges every identifier from `ids` and returns how many were new.
    pub fn extend_counting(&mut self, ids: impl IntoIterator<Item = ListingId>) -> usize {
        ids.into_iter().filter(|id| self.ids.insert(id.clone())).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListingId> {
        self.ids.iter()
    }

    /// Materializes the set as an ordered sequence.
    pub fn to_vec(&self) -> Vec<ListingId> {
        self.ids.iter().cloned().collect()
    }

    /// Splits the set into consecutive batches of at most `batch_size` identifiers.
    /// A `batch_size` of zero is treated as one.
    pub fn batches(&self, batch_size: usize) -> Vec<Vec<ListingId>> {
        self.to_vec()
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

impl FromIterator<ListingId> for ListingSet {
    fn from_iter<I: IntoIterator<Item = ListingId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ListingSet {
    type Item = &'a ListingId;
    type IntoIter = std::collections::btree_set::Iter<'a, ListingId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

/// Where traversal goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRef {
    Url(String),
    /// No "next" control was found.
    End,
}

impl PageRef {
    pub fn from_option(next: Option<String>) -> Self {
        next.map(PageRef::Url).unwrap_or(PageRef::End)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            PageRef::Url(url) => Some(url),
            PageRef::End => None,
        }
    }
}

/// One record returned by the enrichment source. Field order follows the response.
pub type EnrichedRecord = serde_json::Map<String, serde_json::Value>;

/// The check-in/check-out pair shared by the search URL and every enrichment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayWindow {
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
}

impl StayWindow {
    /// `nights` nights starting on `checkin`.
    pub fn starting(checkin: NaiveDate, nights: i64) -> Self {
        Self {
            checkin,
            checkout: checkin + chrono::Duration::days(nights),
        }
    }

    pub fn checkin_param(&self) -> String {
        self.checkin.format("%Y-%m-%d").to_string()
    }

    pub fn checkout_param(&self) -> String {
        self.checkout.format("%Y-%m-%d").to_string()
    }
}
