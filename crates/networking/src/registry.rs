//! Request registries.
//!
//! A [`RequestRegistry`] owns every proxy started for one browsing scope and
//! hands out request ids unique within it. [`ScopedRegistries`] keeps one
//! registry per scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context::{FrameId, InterceptionEnv};
use crate::factory::{Binder, FactoryHandle, InterceptingLoaderFactory, ProxyId, UpstreamNotifier};
use crate::loader::UpstreamLoaderFactory;

struct ProxyEntry {
    render_process_id: i32,
    frame_id: FrameId,
    binder: Binder,
    upstream: UpstreamNotifier,
}

type ProxyTable = Mutex<HashMap<ProxyId, ProxyEntry>>;

/// A running proxy as seen by whoever started it
#[derive(Debug)]
pub struct ProxyBinding {
    pub proxy_id: ProxyId,
    /// First caller binding
    pub handle: FactoryHandle,
    /// Report upstream factory loss here
    pub upstream: UpstreamNotifier,
}

/// All proxies of one browsing scope
pub struct RequestRegistry {
    env: InterceptionEnv,
    next_request_id: Arc<AtomicU64>,
    next_proxy_id: AtomicU64,
    proxies: Arc<ProxyTable>,
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("next_request_id", &self.next_request_id.load(Ordering::Relaxed))
            .field("proxies", &self.proxy_count())
            .finish()
    }
}

impl RequestRegistry {
    pub fn new(env: InterceptionEnv) -> Self {
        Self {
            env,
            next_request_id: Arc::new(AtomicU64::new(1)),
            next_proxy_id: AtomicU64::new(1),
            proxies: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn env(&self) -> &InterceptionEnv {
        &self.env
    }

    /// Creates and registers a factory without running it. The caller is
    /// responsible for driving it with [`InterceptingLoaderFactory::run`] or
    /// [`InterceptingLoaderFactory::pump`]; it deregisters itself on removal.
    pub fn create_proxy(
        &self,
        render_process_id: i32,
        frame_id: FrameId,
        upstream: Box<dyn UpstreamLoaderFactory>,
    ) -> (InterceptingLoaderFactory, ProxyBinding) {
        let proxy_id = self.next_proxy_id.fetch_add(1, Ordering::Relaxed);
        let (mut factory, handle) = InterceptingLoaderFactory::new(
            proxy_id,
            render_process_id,
            frame_id,
            self.env.clone(),
            upstream,
            self.next_request_id.clone(),
        );

        let table: Weak<ProxyTable> = Arc::downgrade(&self.proxies);
        factory.set_removal_callback(Box::new(move |proxy_id| {
            if let Some(table) = table.upgrade() {
                table.lock().remove(&proxy_id);
            }
        }));

        let upstream = factory.upstream_notifier();
        self.proxies.lock().insert(
            proxy_id,
            ProxyEntry {
                render_process_id,
                frame_id,
                binder: factory.binder(),
                upstream: upstream.clone(),
            },
        );
        log::debug!(
            "Proxy {} created for process {} frame {}",
            proxy_id,
            render_process_id,
            frame_id
        );

        (factory, ProxyBinding { proxy_id, handle, upstream })
    }

    /// Creates a proxy and spawns its event loop on the current runtime
    pub fn start_proxying(
        &self,
        render_process_id: i32,
        frame_id: FrameId,
        upstream: Box<dyn UpstreamLoaderFactory>,
    ) -> ProxyBinding {
        let (factory, binding) = self.create_proxy(render_process_id, frame_id, upstream);
        tokio::spawn(factory.run());
        binding
    }

    /// A new caller binding on the live proxy for `(render_process_id,
    /// frame_id)`, if there is one
    pub fn bind_existing(&self, render_process_id: i32, frame_id: FrameId) -> Option<FactoryHandle> {
        let proxies = self.proxies.lock();
        proxies
            .values()
            .filter(|entry| entry.render_process_id == render_process_id && entry.frame_id == frame_id)
            .find_map(|entry| entry.binder.bind())
    }

    /// Tells every proxy its upstream factory is gone
    pub fn disconnect_upstreams(&self) {
        for entry in self.proxies.lock().values() {
            entry.upstream.upstream_disconnected();
        }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.lock().len()
    }

    /// The id the next request in this scope will get
    pub fn peek_next_request_id(&self) -> u64 {
        self.next_request_id.load(Ordering::Relaxed)
    }
}

/// One [`RequestRegistry`] per browsing scope, created on first use
pub struct ScopedRegistries {
    env: InterceptionEnv,
    registries: Mutex<HashMap<String, Arc<RequestRegistry>>>,
}

impl ScopedRegistries {
    pub fn new(env: InterceptionEnv) -> Self {
        Self {
            env,
            registries: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_scope(&self, scope: &str) -> Arc<RequestRegistry> {
        self.registries
            .lock()
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(RequestRegistry::new(self.env.clone())))
            .clone()
    }

    /// Forgets a scope; its proxies keep running until they remove themselves
    pub fn remove_scope(&self, scope: &str) -> Option<Arc<RequestRegistry>> {
        self.registries.lock().remove(scope)
    }

    pub fn len(&self) -> usize {
        self.registries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoFrames;
    use crate::error::NetworkError;
    use crate::loader::{UpstreamClient, UpstreamLoader};
    use crate::request::ResourceRequest;
    use crate::telemetry::NoopSink;
    use crate::ProxyConfig;
    use bulwark_shields::InMemorySettings;

    struct Unreachable;

    impl UpstreamLoaderFactory for Unreachable {
        fn create_loader_and_start(
            &mut self,
            _network_request_id: i32,
            _options: u32,
            _request: &ResourceRequest,
            _client: UpstreamClient,
        ) -> Result<Box<dyn UpstreamLoader>, NetworkError> {
            Err(NetworkError::UpstreamUnavailable)
        }
    }

    fn env() -> InterceptionEnv {
        InterceptionEnv::new(
            ProxyConfig::default(),
            Arc::new(InMemorySettings::new()),
            Arc::new(NoFrames),
            Arc::new(NoopSink),
        )
    }

    #[test]
    fn test_for_scope_reuses_registry() {
        let scopes = ScopedRegistries::new(env());
        let a = scopes.for_scope("profile-1");
        let b = scopes.for_scope("profile-1");
        let c = scopes.for_scope("profile-2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(scopes.len(), 2);

        assert!(scopes.remove_scope("profile-1").is_some());
        assert!(!Arc::ptr_eq(&a, &scopes.for_scope("profile-1")));
    }

    #[test]
    fn test_proxy_deregisters_on_removal() {
        let registry = RequestRegistry::new(env());
        let (mut factory, binding) = registry.create_proxy(1, 7, Box::new(Unreachable));
        assert_eq!(registry.proxy_count(), 1);

        let extra = registry.bind_existing(1, 7).unwrap();
        assert!(registry.bind_existing(1, 8).is_none());
        factory.pump();
        assert_eq!(factory.binding_count(), 2);

        drop(binding);
        drop(extra);
        factory.pump();
        assert!(factory.is_removed());
        assert_eq!(registry.proxy_count(), 0);
    }

    #[test]
    fn test_disconnect_upstreams() {
        let registry = RequestRegistry::new(env());
        let (mut factory, _binding) = registry.create_proxy(1, 7, Box::new(Unreachable));
        registry.disconnect_upstreams();
        factory.pump();
        assert!(!factory.has_upstream());
        assert!(factory.is_removed());
    }
}
