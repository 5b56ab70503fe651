use parking_lot::RwLock;
use serde::Serialize;

/// Registration record for a conversation the backend is watching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerHandle {
    pub chat: String,
    pub registered_at: i64,
}

/// Set of watched conversations keyed by name.
///
/// Adding an existing name and removing an absent one are both no-ops.
/// Names requested before the gateway session opens sit in a queue until
/// [`ListenerSet::take_queued`] hands them out.
#[derive(Debug, Default)]
pub struct ListenerSet {
    active: RwLock<Vec<ListenerHandle>>,
    queued: RwLock<Vec<String>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, chat: &str) -> bool {
        self.active.read().iter().any(|h| h.chat == chat)
    }

    /// Record `chat` as watched. Returns false if it already was.
    pub fn insert(&self, chat: &str) -> bool {
        let mut active = self.active.write();
        if active.iter().any(|h| h.chat == chat) {
            return false;
        }
        active.push(ListenerHandle {
            chat: chat.to_string(),
            registered_at: chrono::Utc::now().timestamp_millis(),
        });
        true
    }

    /// Forget `chat`. Returns the handle if it was watched.
    pub fn remove(&self, chat: &str) -> Option<ListenerHandle> {
        let mut active = self.active.write();
        let index = active.iter().position(|h| h.chat == chat)?;
        Some(active.remove(index))
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.active.read().iter().map(|h| h.chat.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    pub fn queue(&self, chat: impl Into<String>) {
        let chat = chat.into();
        let mut queued = self.queued.write();
        if !queued.contains(&chat) {
            queued.push(chat);
        }
    }

    /// Drain queued names that are not already watched.
    pub fn take_queued(&self) -> Vec<String> {
        let queued = std::mem::take(&mut *self.queued.write());
        queued.into_iter().filter(|c| !self.contains(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let set = ListenerSet::new();
        assert!(set.insert("team"));
        assert!(!set.insert("team"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.names(), vec!["team"]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let set = ListenerSet::new();
        assert!(set.remove("ghost").is_none());
        assert!(set.is_empty());
    }

    #[test]
    fn remove_returns_handle() {
        let set = ListenerSet::new();
        set.insert("a");
        set.insert("b");
        let handle = set.remove("a").unwrap();
        assert_eq!(handle.chat, "a");
        assert!(handle.registered_at > 0);
        assert_eq!(set.names(), vec!["b"]);
    }

    #[test]
    fn names_keep_registration_order() {
        let set = ListenerSet::new();
        for name in ["z", "a", "m"] {
            set.insert(name);
        }
        assert_eq!(set.names(), vec!["z", "a", "m"]);
    }

    #[test]
    fn queued_names_skip_active_and_duplicates() {
        let set = ListenerSet::new();
        set.insert("already");
        set.queue("already");
        set.queue("new");
        set.queue("new");

        assert_eq!(set.take_queued(), vec!["new"]);
        assert!(set.take_queued().is_empty());
    }
}
