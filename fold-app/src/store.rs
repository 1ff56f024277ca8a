//! Per-owner pending-request store.
//!
//! Each owner holds at most one aggregated request; the map goes directly
//! from owner to entry, so there is never a scan to find "the request for
//! this sender". Timer lifecycle is deliberately not handled here: `upsert`
//! reports the retired id and the caller drives the scheduler.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fold_channels::SenderId;
use std::fmt;

/// Separator inserted between the existing text and a merged-in follow-up.
pub const MERGE_SEPARATOR: &str = "\n\n[addendum]\n";

const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Ids derive from the owner and the creation instant; every merge mints
    /// a new id and retires the old one.
    fn generate(owner: &SenderId, at: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", owner.as_str(), at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: RequestId,
    pub owner: SenderId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Result of an upsert. `replaced` carries the retired id when the call
/// merged into an existing entry; the caller must cancel that id's timer
/// before scheduling one for `id`.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub id: RequestId,
    pub replaced: Option<RequestId>,
}

#[derive(Debug, Clone)]
pub struct PendingSummary {
    pub id: RequestId,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PendingStore {
    entries: DashMap<SenderId, PendingRequest>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh entry, or merge `text` into the owner's existing one
    /// under a newly minted id. The old id is retired atomically with the
    /// installation of the new one; callers observe only the combined state.
    pub fn upsert(&self, owner: &SenderId, text: &str, now: DateTime<Utc>) -> UpsertOutcome {
        let id = RequestId::generate(owner, now);
        match self.entries.entry(owner.clone()) {
            Entry::Occupied(mut entry) => {
                let replaced = entry.get().id.clone();
                let merged = format!("{}{}{}", entry.get().text, MERGE_SEPARATOR, text);
                entry.insert(PendingRequest {
                    id: id.clone(),
                    owner: owner.clone(),
                    text: merged,
                    created_at: now,
                });
                UpsertOutcome {
                    id,
                    replaced: Some(replaced),
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingRequest {
                    id: id.clone(),
                    owner: owner.clone(),
                    text: text.to_string(),
                    created_at: now,
                });
                UpsertOutcome { id, replaced: None }
            }
        }
    }

    /// Remove and return the owner's entry iff its current id still matches
    /// `request_id`. `None` means the request was superseded by a merge (or
    /// cancelled) and must not be dispatched.
    pub fn take(&self, owner: &SenderId, request_id: &RequestId) -> Option<PendingRequest> {
        self.entries
            .remove_if(owner, |_, pending| pending.id == *request_id)
            .map(|(_, pending)| pending)
    }

    /// Read-only snapshot for status reporting.
    pub fn peek_all(&self, owner: &SenderId) -> Vec<PendingSummary> {
        self.entries
            .get(owner)
            .map(|pending| {
                vec![PendingSummary {
                    id: pending.id.clone(),
                    preview: preview(&pending.text),
                    created_at: pending.created_at,
                }]
            })
            .unwrap_or_default()
    }

    /// Remove the owner's entry if present, returning it so the caller can
    /// cancel the matching timer.
    pub fn clear(&self, owner: &SenderId) -> Option<PendingRequest> {
        self.entries.remove(owner).map(|(_, pending)| pending)
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{MERGE_SEPARATOR, PendingStore, RequestId, preview};
    use chrono::{TimeZone, Utc};
    use fold_channels::SenderId;

    fn t(secs: i64) -> chrono::DateTime<chrono::Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn upsert_creates_then_merges_with_separator_and_new_id() {
        let store = PendingStore::new();
        let owner = SenderId::from("u1");

        let first = store.upsert(&owner, "A", t(100));
        assert!(first.replaced.is_none());
        assert_eq!(first.id.as_str(), "u1_100000");

        let second = store.upsert(&owner, "B", t(110));
        assert_eq!(second.replaced.as_ref(), Some(&first.id));
        assert_ne!(second.id, first.id);

        let pending = store.take(&owner, &second.id).expect("entry present");
        assert_eq!(pending.text, format!("A{MERGE_SEPARATOR}B"));
        assert_eq!(pending.created_at, t(110));
    }

    #[test]
    fn take_rejects_a_superseded_id() {
        let store = PendingStore::new();
        let owner = SenderId::from("u1");

        let first = store.upsert(&owner, "A", t(100));
        let second = store.upsert(&owner, "B", t(110));

        assert!(store.take(&owner, &first.id).is_none(), "old id is retired");
        assert!(store.take(&owner, &second.id).is_some());
        assert!(
            store.take(&owner, &second.id).is_none(),
            "take removes the entry"
        );
    }

    #[test]
    fn take_ignores_unknown_owner_and_foreign_ids() {
        let store = PendingStore::new();
        let owner = SenderId::from("u1");
        store.upsert(&owner, "A", t(100));

        assert!(store.take(&SenderId::from("u2"), &RequestId::from("u2_1")).is_none());
        assert!(store.take(&owner, &RequestId::from("bogus")).is_none());
        assert_eq!(store.peek_all(&owner).len(), 1, "entry untouched");
    }

    #[test]
    fn clear_removes_at_most_one_entry_and_is_idempotent() {
        let store = PendingStore::new();
        let owner = SenderId::from("u1");
        let other = SenderId::from("u2");
        store.upsert(&owner, "A", t(100));
        store.upsert(&other, "B", t(100));

        assert!(store.clear(&owner).is_some());
        assert!(store.clear(&owner).is_none());
        assert_eq!(store.peek_all(&other).len(), 1, "other owners untouched");
    }

    #[test]
    fn preview_truncates_to_fifty_chars_with_ellipsis() {
        let short = "hello";
        assert_eq!(preview(short), "hello");

        let long = "x".repeat(60);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 53);
        assert!(p.ends_with("..."));

        // Truncation counts characters, not bytes.
        let cyrillic = "п".repeat(60);
        assert!(preview(&cyrillic).ends_with("..."));
    }

    #[test]
    fn peek_all_reports_id_preview_and_creation_time() {
        let store = PendingStore::new();
        let owner = SenderId::from("u1");
        let outcome = store.upsert(&owner, "write a slogan", t(100));

        let summaries = store.peek_all(&owner);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, outcome.id);
        assert_eq!(summaries[0].preview, "write a slogan");
        assert_eq!(summaries[0].created_at, t(100));

        assert!(store.peek_all(&SenderId::from("nobody")).is_empty());
    }
}
