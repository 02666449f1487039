//! Host capability probing
//!
//! Each backend is probed at most once until refreshed. Results live in a
//! `OnceCell` per backend, so concurrent first callers run a single probe and
//! all observe its result. `refresh` probes into a fresh cell and swaps it in.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::DispatchConfig;

/// A host facility dispatch may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Runtime code emission
    Codegen,
    /// Loading into a fresh, independently reclaimable context
    IsolatedLoader,
    /// Loading without an auxiliary context
    DirectDefine,
}

impl Backend {
    /// All backends in probe-table order
    pub const ALL: [Backend; 3] = [Backend::Codegen, Backend::IsolatedLoader, Backend::DirectDefine];

    /// Stable string id
    pub fn id(self) -> &'static str {
        match self {
            Backend::Codegen => "codegen",
            Backend::IsolatedLoader => "isolated-loader",
            Backend::DirectDefine => "direct-define",
        }
    }

    /// Parse a string id
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.id() == id)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Source of truth for what the host supports
pub trait HostEnvironment: Send + Sync {
    /// Host name for diagnostics
    fn name(&self) -> &str;

    /// Check whether `backend` works on this host. May be expensive.
    fn probe(&self, backend: Backend) -> bool;
}

/// The running process, filtered by configuration and environment.
///
/// `CONDUIT_DISABLE_CODEGEN`, `CONDUIT_DISABLE_ISOLATED` and
/// `CONDUIT_DISABLE_DIRECT_DEFINE` switch a backend off when set to anything
/// other than empty or `0`.
#[derive(Debug, Clone, Default)]
pub struct NativeHost {
    config: DispatchConfig,
}

impl NativeHost {
    /// Native host honouring `config`
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    fn env_disabled(var: &str) -> bool {
        std::env::var_os(var)
            .map(|v| !v.is_empty() && v != "0")
            .unwrap_or(false)
    }
}

impl HostEnvironment for NativeHost {
    fn name(&self) -> &str {
        "native"
    }

    fn probe(&self, backend: Backend) -> bool {
        match backend {
            Backend::Codegen => !Self::env_disabled("CONDUIT_DISABLE_CODEGEN"),
            Backend::IsolatedLoader => {
                self.config.allow_isolated_loader && !Self::env_disabled("CONDUIT_DISABLE_ISOLATED")
            }
            Backend::DirectDefine => {
                self.config.allow_direct_define
                    && !Self::env_disabled("CONDUIT_DISABLE_DIRECT_DEFINE")
            }
        }
    }
}

/// Host double with switchable capabilities and a probe counter
#[derive(Debug)]
pub struct SimulatedHost {
    flags: [AtomicBool; 3],
    probes: AtomicUsize,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// Host supporting every backend
    pub fn new() -> Self {
        Self {
            flags: [AtomicBool::new(true), AtomicBool::new(true), AtomicBool::new(true)],
            probes: AtomicUsize::new(0),
        }
    }

    /// Host supporting every backend except `backend`
    pub fn without(backend: Backend) -> Self {
        let host = Self::new();
        host.set(backend, false);
        host
    }

    /// Switch a backend on or off; takes effect at the next probe
    pub fn set(&self, backend: Backend, available: bool) {
        self.flags[backend.index()].store(available, Ordering::SeqCst);
    }

    /// Number of probes executed so far
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl HostEnvironment for SimulatedHost {
    fn name(&self) -> &str {
        "simulated"
    }

    fn probe(&self, backend: Backend) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.flags[backend.index()].load(Ordering::SeqCst)
    }
}

/// Memoized capability answers for one host
pub struct CapabilityProbe {
    host: Arc<dyn HostEnvironment>,
    cells: [RwLock<Arc<OnceCell<bool>>>; 3],
}

impl CapabilityProbe {
    /// Probe over `host`
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            host,
            cells: std::array::from_fn(|_| RwLock::new(Arc::new(OnceCell::new()))),
        }
    }

    /// Probe over the running process
    pub fn native(config: &DispatchConfig) -> Self {
        Self::new(Arc::new(NativeHost::new(config.clone())))
    }

    /// The probed host
    pub fn host(&self) -> &Arc<dyn HostEnvironment> {
        &self.host
    }

    /// Whether `backend` is usable. Probes on first use only.
    pub fn is_available(&self, backend: Backend) -> bool {
        let cell = self.cells[backend.index()].read().clone();
        *cell.get_or_init(|| self.run(backend))
    }

    /// Like `is_available`, keyed by string id; unknown ids are unavailable
    pub fn is_available_id(&self, id: &str) -> bool {
        Backend::from_id(id)
            .map(|b| self.is_available(b))
            .unwrap_or(false)
    }

    /// Probe again and publish the new answer
    pub fn refresh(&self, backend: Backend) -> bool {
        let fresh = Arc::new(OnceCell::new());
        let available = *fresh.get_or_init(|| self.run(backend));
        *self.cells[backend.index()].write() = fresh;
        available
    }

    fn run(&self, backend: Backend) -> bool {
        let available = self.host.probe(backend);
        debug!(host = self.host.name(), backend = backend.id(), available, "capability probed");
        available
    }
}

impl fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("host", &self.host.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_probe_memoized() {
        let host = Arc::new(SimulatedHost::new());
        let probe = CapabilityProbe::new(host.clone());
        assert!(probe.is_available(Backend::Codegen));
        assert!(probe.is_available(Backend::Codegen));
        assert_eq!(host.probe_count(), 1);
    }

    #[test]
    fn test_refresh_sees_change() {
        let host = Arc::new(SimulatedHost::new());
        let probe = CapabilityProbe::new(host.clone());
        assert!(probe.is_available(Backend::IsolatedLoader));
        host.set(Backend::IsolatedLoader, false);
        assert!(probe.is_available(Backend::IsolatedLoader));
        assert!(!probe.refresh(Backend::IsolatedLoader));
        assert!(!probe.is_available(Backend::IsolatedLoader));
        assert_eq!(host.probe_count(), 2);
    }

    #[test]
    fn test_ids() {
        let probe = CapabilityProbe::new(Arc::new(SimulatedHost::without(Backend::DirectDefine)));
        assert!(probe.is_available_id("codegen"));
        assert!(!probe.is_available_id("direct-define"));
        assert!(!probe.is_available_id("bogus"));
        for b in Backend::ALL {
            assert_eq!(Backend::from_id(b.id()), Some(b));
        }
    }

    #[test]
    fn test_concurrent_first_probe_runs_once() {
        let host = Arc::new(SimulatedHost::new());
        let probe = CapabilityProbe::new(host.clone());
        let barrier = Barrier::new(8);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    assert!(probe.is_available(Backend::Codegen));
                });
            }
        });
        assert_eq!(host.probe_count(), 1);
    }

    #[test]
    fn test_native_host_respects_config() {
        let config = DispatchConfig {
            allow_isolated_loader: false,
            ..Default::default()
        };
        let host = NativeHost::new(config);
        assert!(!host.probe(Backend::IsolatedLoader));
    }
}
