//! Live relay session bookkeeping

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;
use virtgate_common::{ConnectionStats, ConsoleType, Error, ProxyStats, Result};

/// An active relay session.
///
/// The relay task exclusively owns the two stream handles; this record is
/// the non-owning reference the registry and reaper work with. Counters
/// live under their own lock so the relay hot path never contends with
/// registry bookkeeping.
pub struct ProxyConnection {
    id: String,
    vm_name: String,
    vm_uuid: String,
    console_type: ConsoleType,
    created_at: Instant,
    activity: Mutex<Activity>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

struct Activity {
    last_activity: Instant,
    bytes_sent: u64,
    bytes_recv: u64,
}

impl ProxyConnection {
    pub fn new(vm_name: &str, vm_uuid: &str, console_type: ConsoleType) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            vm_name: vm_name.to_string(),
            vm_uuid: vm_uuid.to_string(),
            console_type,
            created_at: now,
            activity: Mutex::new(Activity {
                last_activity: now,
                bytes_sent: 0,
                bytes_recv: 0,
            }),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    pub fn vm_uuid(&self) -> &str {
        &self.vm_uuid
    }

    pub fn console_type(&self) -> ConsoleType {
        self.console_type
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Cancellation signal shared by all subtasks of this session
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record client-visible liveness
    pub fn touch(&self) {
        self.activity.lock().last_activity = Instant::now();
    }

    pub fn add_sent(&self, n: u64) {
        let mut activity = self.activity.lock();
        activity.bytes_sent += n;
        activity.last_activity = Instant::now();
    }

    pub fn add_recv(&self, n: u64) {
        let mut activity = self.activity.lock();
        activity.bytes_recv += n;
        activity.last_activity = Instant::now();
    }

    /// (bytes_sent, bytes_recv) snapshot
    pub fn bytes(&self) -> (u64, u64) {
        let activity = self.activity.lock();
        (activity.bytes_sent, activity.bytes_recv)
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.lock().last_activity.elapsed()
    }

    /// Signal the session to terminate. Idempotent under concurrent and
    /// repeated invocation; the single CAS winner fires the cancellation
    /// that lets the owning relay task close both streams once.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Tracks live relay sessions and enforces admission caps
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<ProxyConnection>>>,
    max_per_vm: usize,
    max_total: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_vm: usize, max_total: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_per_vm,
            max_total,
        }
    }

    /// Admit a connection, atomically checking the per-VM cap and then the
    /// total cap before inserting
    pub fn admit(&self, conn: &Arc<ProxyConnection>) -> Result<()> {
        let mut connections = self.connections.lock();

        let vm_count = connections
            .values()
            .filter(|c| c.vm_name() == conn.vm_name())
            .count();
        if vm_count >= self.max_per_vm {
            return Err(Error::MaxConnectionsReached(format!(
                "VM {} already has {} connections",
                conn.vm_name(),
                vm_count
            )));
        }

        if connections.len() >= self.max_total {
            return Err(Error::MaxConnectionsReached(format!(
                "{} total connections",
                connections.len()
            )));
        }

        connections.insert(conn.id().to_string(), conn.clone());
        Ok(())
    }

    /// Close and delete a connection. No-op for unknown IDs.
    pub fn remove(&self, id: &str) {
        if let Some(conn) = self.connections.lock().remove(id) {
            conn.close();
        }
    }

    /// Close and remove every connection for a VM, returning how many
    pub fn close_all_for_vm(&self, vm_name: &str) -> usize {
        let mut connections = self.connections.lock();
        let ids: Vec<String> = connections
            .values()
            .filter(|c| c.vm_name() == vm_name)
            .map(|c| c.id().to_string())
            .collect();
        for id in &ids {
            if let Some(conn) = connections.remove(id) {
                conn.close();
            }
        }
        if !ids.is_empty() {
            debug!(vm = vm_name, count = ids.len(), "closed VM console connections");
        }
        ids.len()
    }

    /// Close and remove every tracked connection
    pub fn close_all(&self) -> usize {
        let mut connections = self.connections.lock();
        let count = connections.len();
        for conn in connections.values() {
            conn.close();
        }
        connections.clear();
        count
    }

    /// Close and remove connections idle longer than `idle_timeout`
    pub fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let mut connections = self.connections.lock();
        let ids: Vec<String> = connections
            .values()
            .filter(|c| c.idle_for() > idle_timeout)
            .map(|c| c.id().to_string())
            .collect();
        for id in &ids {
            if let Some(conn) = connections.remove(id) {
                debug!(id = %conn.id(), vm = %conn.vm_name(), "evicting idle console connection");
                conn.close();
            }
        }
        ids.len()
    }

    /// Look up a live connection by ID
    pub fn get(&self, id: &str) -> Option<Arc<ProxyConnection>> {
        self.connections.lock().get(id).cloned()
    }

    /// Number of live connections for a VM
    pub fn active_for_vm(&self, vm_name: &str) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|c| c.vm_name() == vm_name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Connection-side statistics; the service layer adds the token count
    pub fn stats(&self) -> ProxyStats {
        let connections = self.connections.lock();
        let mut per_vm: HashMap<String, usize> = HashMap::new();
        let mut per_conn = Vec::with_capacity(connections.len());
        for conn in connections.values() {
            *per_vm.entry(conn.vm_name().to_string()).or_default() += 1;
            let (bytes_sent, bytes_recv) = conn.bytes();
            per_conn.push(ConnectionStats {
                id: conn.id().to_string(),
                vm_name: conn.vm_name().to_string(),
                console_type: conn.console_type(),
                bytes_sent,
                bytes_recv,
            });
        }
        ProxyStats {
            total_connections: connections.len(),
            total_tokens: 0,
            connections_per_vm: per_vm,
            connections: per_conn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(vm: &str) -> Arc<ProxyConnection> {
        ProxyConnection::new(vm, "uuid-1", ConsoleType::Vnc)
    }

    #[test]
    fn test_per_vm_cap() {
        let registry = ConnectionRegistry::new(2, 100);

        let a = conn("vm1");
        let b = conn("vm1");
        registry.admit(&a).unwrap();
        registry.admit(&b).unwrap();

        let c = conn("vm1");
        assert!(matches!(
            registry.admit(&c),
            Err(Error::MaxConnectionsReached(_))
        ));
        // Other VMs are unaffected
        registry.admit(&conn("vm2")).unwrap();

        // Removing one frees the slot again
        registry.remove(a.id());
        registry.admit(&c).unwrap();
        assert_eq!(registry.active_for_vm("vm1"), 2);
    }

    #[test]
    fn test_total_cap() {
        let registry = ConnectionRegistry::new(5, 2);
        registry.admit(&conn("vm1")).unwrap();
        registry.admit(&conn("vm2")).unwrap();
        assert!(matches!(
            registry.admit(&conn("vm3")),
            Err(Error::MaxConnectionsReached(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new(5, 100);
        let a = conn("vm1");
        registry.admit(&a).unwrap();
        registry.remove(a.id());
        registry.remove(a.id());
        registry.remove("no-such-id");
        assert!(registry.is_empty());
        assert!(a.is_closed());
    }

    #[test]
    fn test_close_all_for_vm() {
        let registry = ConnectionRegistry::new(5, 100);
        let a = conn("vm1");
        let b = conn("vm1");
        let c = conn("vm2");
        registry.admit(&a).unwrap();
        registry.admit(&b).unwrap();
        registry.admit(&c).unwrap();

        assert_eq!(registry.close_all_for_vm("vm1"), 2);
        assert_eq!(registry.active_for_vm("vm1"), 0);
        assert_eq!(registry.active_for_vm("vm2"), 1);
        assert!(a.is_closed() && b.is_closed() && !c.is_closed());

        // Idempotent on an already-empty VM
        assert_eq!(registry.close_all_for_vm("vm1"), 0);
    }

    #[test]
    fn test_connection_close_is_idempotent() {
        let a = conn("vm1");
        let token = a.cancel_token();
        assert!(!token.is_cancelled());
        a.close();
        a.close();
        a.close();
        assert!(a.is_closed());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_counters_monotonic() {
        let a = conn("vm1");
        a.add_sent(10);
        a.add_recv(3);
        a.add_sent(5);
        assert_eq!(a.bytes(), (15, 3));
        assert!(a.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn test_evict_idle_spares_active() {
        let registry = ConnectionRegistry::new(5, 100);
        let stale = conn("vm1");
        let fresh = conn("vm2");
        registry.admit(&stale).unwrap();
        registry.admit(&fresh).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        fresh.touch();

        assert_eq!(registry.evict_idle(Duration::from_millis(10)), 1);
        assert!(stale.is_closed());
        assert!(!fresh.is_closed());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stats() {
        let registry = ConnectionRegistry::new(5, 100);
        let a = conn("vm1");
        a.add_sent(10);
        a.add_recv(7);
        registry.admit(&a).unwrap();
        registry.admit(&conn("vm1")).unwrap();
        registry.admit(&conn("vm2")).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.connections_per_vm["vm1"], 2);
        assert_eq!(stats.connections_per_vm["vm2"], 1);

        // Per-connection byte snapshots ride along
        assert_eq!(stats.connections.len(), 3);
        let snap = stats.connections.iter().find(|c| c.id == a.id()).unwrap();
        assert_eq!((snap.bytes_sent, snap.bytes_recv), (10, 7));
        assert_eq!(snap.vm_name, "vm1");
    }

    #[test]
    fn test_get_by_id() {
        let registry = ConnectionRegistry::new(5, 100);
        let a = conn("vm1");
        registry.admit(&a).unwrap();
        assert_eq!(registry.get(a.id()).unwrap().vm_name(), "vm1");
        assert!(registry.get("no-such-id").is_none());
    }
}
