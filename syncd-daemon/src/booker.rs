//! Ref-counted reservation table for storage backends.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

struct Booking {
    owner: String,
    ref_count: u32,
}

/// Guards shared storage backends against concurrent use.
///
/// Reservation is all-or-nothing: a batch either commits for every name
/// or not at all. The table is shared between the orchestrator loop and
/// externally invoked reservation calls, so every operation takes the
/// mutex for the duration of one check-and-commit and nothing more.
#[derive(Default)]
pub struct StorageBooker {
    bookings: Mutex<HashMap<String, Booking>>,
}

impl StorageBooker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve every name in `names` for `owner`, or nothing.
    ///
    /// A name already held by the same non-empty owner has its reference
    /// count incremented. An empty owner id never matches an existing
    /// booking, so anonymous callers cannot share each other's claims.
    pub fn reserve(&self, names: &[String], owner: &str) -> bool {
        let mut bookings = self.bookings.lock().unwrap();
        let all_free = names.iter().all(|name| Self::is_free(&bookings, name, owner));
        if !all_free {
            debug!(owner, ?names, "storage reservation denied");
            return false;
        }
        for name in names {
            bookings
                .entry(name.clone())
                .and_modify(|b| b.ref_count += 1)
                .or_insert_with(|| Booking {
                    owner: owner.to_string(),
                    ref_count: 1,
                });
        }
        debug!(owner, ?names, "storages reserved");
        true
    }

    /// Release one reference on every name, removing entries that reach
    /// zero. Unknown names are ignored.
    pub fn release(&self, names: &[String]) {
        let mut bookings = self.bookings.lock().unwrap();
        for name in names {
            if let Some(booking) = bookings.get_mut(name) {
                booking.ref_count -= 1;
                if booking.ref_count == 0 {
                    bookings.remove(name);
                }
            }
        }
    }

    /// Whether a reserve call for `names` by `owner` would succeed.
    pub fn available(&self, names: &[String], owner: &str) -> bool {
        let bookings = self.bookings.lock().unwrap();
        names.iter().all(|name| Self::is_free(&bookings, name, owner))
    }

    fn is_free(bookings: &HashMap<String, Booking>, name: &str, owner: &str) -> bool {
        match bookings.get(name) {
            None => true,
            Some(booking) => !owner.is_empty() && booking.owner == owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_conflict_commits_nothing() {
        let booker = StorageBooker::new();
        assert!(booker.reserve(&names(&["contacts"]), "a"));

        // "calendar" is free but "contacts" is not: nothing is committed.
        assert!(!booker.reserve(&names(&["calendar", "contacts"]), "b"));
        assert!(booker.available(&names(&["calendar"]), "b"));

        booker.release(&names(&["contacts"]));
        assert!(booker.reserve(&names(&["calendar", "contacts"]), "b"));
    }

    #[test]
    fn same_owner_increments_ref_count() {
        let booker = StorageBooker::new();
        let contacts = names(&["contacts"]);
        assert!(booker.reserve(&contacts, "a"));
        assert!(booker.reserve(&contacts, "a"));
        assert!(!booker.available(&contacts, "b"));

        booker.release(&contacts);
        // Still one reference held.
        assert!(!booker.available(&contacts, "b"));
        booker.release(&contacts);
        assert!(booker.available(&contacts, "b"));
    }

    #[test]
    fn empty_owner_never_shares() {
        let booker = StorageBooker::new();
        let contacts = names(&["contacts"]);
        assert!(booker.reserve(&contacts, ""));
        assert!(!booker.available(&contacts, ""));
        assert!(!booker.reserve(&contacts, ""));

        booker.release(&contacts);
        assert!(booker.reserve(&contacts, ""));
    }

    #[test]
    fn release_of_unknown_name_is_ignored() {
        let booker = StorageBooker::new();
        booker.release(&names(&["nothing"]));
        assert!(booker.available(&names(&["nothing"]), "a"));
    }
}
