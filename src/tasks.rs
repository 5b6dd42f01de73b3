//! Bookkeeping for in-flight network operations.
//!
//! The registry tracks every live operation by its correlation id so callers
//! can cancel it or ask whether it is still running, and maps transport task
//! ids to download file names because the transfer completion path only
//! knows the transport id, not the correlation id the caller used.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Registry of in-flight operations. All access is serialized through an
/// internal lock because completion paths and caller-invoked cancels run
/// concurrently.
pub struct TaskRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    active: HashMap<Uuid, ActiveTask>,
    download_names: HashMap<u64, String>,
    next_lease: u64,
    next_transport_id: u64,
}

struct ActiveTask {
    url: Url,
    // URLs of live sub-requests running under this task's identity
    nested_urls: Vec<Url>,
    token: CancellationToken,
    lease: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: HashMap::new(),
                download_names: HashMap::new(),
                next_lease: 0,
                next_transport_id: 0,
            }),
        }
    }

    /// Register an operation under `id` and hand back a lease holding its
    /// cancellation token. The lease removes the entry when dropped.
    ///
    /// If `id` is already live the new lease is a nested operation (an
    /// authorization sub-request running on behalf of the original): it gets
    /// a child of the live token, so cancelling the original cancels it too,
    /// and dropping it leaves the original's entry in place. The nested
    /// URL is recorded so URL-based activity queries see the sub-request.
    pub fn begin(self: &Arc<Self>, id: Uuid, url: Url) -> TaskLease {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.active.get_mut(&id) {
            existing.nested_urls.push(url.clone());
            return TaskLease {
                registry: Arc::clone(self),
                id,
                token: existing.token.child_token(),
                role: LeaseRole::Nested(url),
            };
        }

        inner.next_lease += 1;
        let lease = inner.next_lease;
        let token = CancellationToken::new();
        inner.active.insert(
            id,
            ActiveTask {
                url,
                nested_urls: Vec::new(),
                token: token.clone(),
                lease,
            },
        );
        TaskLease {
            registry: Arc::clone(self),
            id,
            token,
            role: LeaseRole::Owner(lease),
        }
    }

    fn end(&self, id: Uuid, lease: u64) {
        let mut inner = self.inner.lock();
        if inner.active.get(&id).is_some_and(|task| task.lease == lease) {
            inner.active.remove(&id);
        }
    }

    fn end_nested(&self, id: Uuid, url: &Url) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.active.get_mut(&id) {
            if let Some(index) = task.nested_urls.iter().position(|u| u == url) {
                task.nested_urls.remove(index);
            }
        }
    }

    /// Cancel the operation registered under `id` and remove its entry.
    pub fn cancel(&self, id: Uuid) {
        let task = self.inner.lock().active.remove(&id);
        if let Some(task) = task {
            tracing::debug!(%id, "cancelling in-flight task");
            task.token.cancel();
        }
    }

    /// Cancel every live operation and clear the registry.
    pub fn cancel_all(&self) {
        let tasks: Vec<ActiveTask> = self.inner.lock().active.drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.token.cancel();
        }
        if !tasks.is_empty() {
            tracing::debug!(count = tasks.len(), "cancelled all in-flight tasks");
        }
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.inner.lock().active.contains_key(&id)
    }

    pub fn is_active_for_url(&self, url: &Url) -> bool {
        self.inner
            .lock()
            .active
            .values()
            .any(|task| task.url == *url || task.nested_urls.contains(url))
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Reserve a transport task id for a download and remember its file name.
    pub fn assign_download(&self, file_name: &str) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_transport_id += 1;
        let transport_id = inner.next_transport_id;
        inner
            .download_names
            .insert(transport_id, file_name.to_string());
        transport_id
    }

    /// File name recorded for a transport task, without clearing it.
    pub fn download_name(&self, transport_id: u64) -> Option<String> {
        self.inner.lock().download_names.get(&transport_id).cloned()
    }

    /// Clear and return the file name recorded for a transport task.
    pub fn take_download_name(&self, transport_id: u64) -> Option<String> {
        self.inner.lock().download_names.remove(&transport_id)
    }

    pub fn download_name_count(&self) -> usize {
        self.inner.lock().download_names.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TaskRegistry")
            .field("active", &inner.active.len())
            .field("download_names", &inner.download_names.len())
            .finish()
    }
}

/// Live handle on a registered operation.
///
/// Holds the operation's cancellation token; dropping the lease removes the
/// registry entry (unless the lease is nested inside another operation).
pub struct TaskLease {
    registry: Arc<TaskRegistry>,
    id: Uuid,
    token: CancellationToken,
    role: LeaseRole,
}

enum LeaseRole {
    /// The lease that registered the entry; generation-checked on drop.
    Owner(u64),
    /// A sub-request under an existing entry; drop only clears its URL.
    Nested(Url),
}

impl TaskLease {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        match &self.role {
            LeaseRole::Owner(lease) => self.registry.end(self.id, *lease),
            LeaseRole::Nested(url) => self.registry.end_nested(self.id, url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn lease_registers_and_unregisters() {
        let registry = Arc::new(TaskRegistry::new());
        let id = Uuid::new_v4();

        let lease = registry.begin(id, url("https://example.com/a"));
        assert!(registry.is_active(id));
        assert!(registry.is_active_for_url(&url("https://example.com/a")));

        drop(lease);
        assert!(!registry.is_active(id));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn cancel_removes_entry_and_fires_token() {
        let registry = Arc::new(TaskRegistry::new());
        let id = Uuid::new_v4();

        let lease = registry.begin(id, url("https://example.com/a"));
        registry.cancel(id);

        assert!(!registry.is_active(id));
        assert!(lease.token().is_cancelled());
    }

    #[test]
    fn nested_lease_shares_cancellation_and_keeps_parent_entry() {
        let registry = Arc::new(TaskRegistry::new());
        let id = Uuid::new_v4();

        let parent = registry.begin(id, url("https://example.com/a"));
        let child = registry.begin(id, url("https://example.com/token"));

        // dropping the nested lease must not remove the parent's entry
        drop(child);
        assert!(registry.is_active(id));

        let child = registry.begin(id, url("https://example.com/token"));
        registry.cancel(id);
        assert!(child.token().is_cancelled());
        assert!(parent.token().is_cancelled());
    }

    #[test]
    fn nested_lease_makes_its_url_visible_while_live() {
        let registry = Arc::new(TaskRegistry::new());
        let id = Uuid::new_v4();

        let parent = registry.begin(id, url("https://example.com/a"));
        assert!(!registry.is_active_for_url(&url("https://example.com/token")));

        let child = registry.begin(id, url("https://example.com/token"));
        assert!(registry.is_active_for_url(&url("https://example.com/token")));

        drop(child);
        assert!(!registry.is_active_for_url(&url("https://example.com/token")));
        assert!(registry.is_active_for_url(&url("https://example.com/a")));
        drop(parent);
    }

    #[test]
    fn stale_lease_drop_leaves_newer_registration_alone() {
        let registry = Arc::new(TaskRegistry::new());
        let id = Uuid::new_v4();

        let old = registry.begin(id, url("https://example.com/a"));
        registry.cancel(id);
        let new = registry.begin(id, url("https://example.com/a"));

        drop(old);
        assert!(registry.is_active(id));
        drop(new);
        assert!(!registry.is_active(id));
    }

    #[test]
    fn download_names_are_assigned_and_taken_once() {
        let registry = TaskRegistry::new();
        let a = registry.assign_download("a.pdf");
        let b = registry.assign_download("b.pdf");
        assert_ne!(a, b);
        assert_eq!(registry.download_name_count(), 2);

        assert_eq!(registry.download_name(a).as_deref(), Some("a.pdf"));
        assert_eq!(registry.take_download_name(a).as_deref(), Some("a.pdf"));
        assert_eq!(registry.take_download_name(a), None);
        assert_eq!(registry.download_name_count(), 1);
    }

    #[test]
    fn cancel_all_clears_active_tasks() {
        let registry = Arc::new(TaskRegistry::new());
        let lease_a = registry.begin(Uuid::new_v4(), url("https://example.com/a"));
        let lease_b = registry.begin(Uuid::new_v4(), url("https://example.com/b"));

        registry.cancel_all();
        assert_eq!(registry.active_count(), 0);
        assert!(lease_a.token().is_cancelled());
        assert!(lease_b.token().is_cancelled());
    }
}
