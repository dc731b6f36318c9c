//! The intercepting loader factory.
//!
//! A factory is an actor: it owns every request started through it and is
//! driven by [`FactoryEvent`]s arriving on one channel. Callers hold
//! [`FactoryHandle`]s (one per binding), upstream loaders hold
//! [`UpstreamClient`](crate::loader::UpstreamClient)s, and both only ever
//! send messages. Requests are kept in a map keyed by id; upstream events
//! also carry the generation of the binding they came from, and events for a
//! missing request or an old generation are dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::context::{FrameId, InterceptionEnv, RequestId};
use crate::error::{NetError, NetworkError};
use crate::in_flight::{Disposition, FactoryPort, InFlightRequest};
use crate::loader::{LoaderCommand, LoaderHandle, RequestKey, UpstreamEvent, UpstreamLoaderFactory, UrlLoaderClient};
use crate::request::ResourceRequest;
use crate::response::{CompletionStatus, RedirectInfo, ResponseBody, ResponseHead};

/// Registry-unique factory identifier
pub type ProxyId = u64;

/// Identifies one caller binding of a factory
pub type BindingId = u64;

/// Everything a factory reacts to
pub enum FactoryEvent {
    CreateLoader {
        binding: BindingId,
        id: RequestId,
        network_request_id: i32,
        options: u32,
        request: ResourceRequest,
        client: Box<dyn UrlLoaderClient>,
    },
    Loader {
        id: RequestId,
        command: LoaderCommand,
    },
    Upstream {
        key: RequestKey,
        event: UpstreamEvent,
    },
    Clone(BindingId),
    BindingClosed(BindingId),
    UpstreamFactoryDisconnected,
}

impl fmt::Debug for FactoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryEvent::CreateLoader { binding, id, request, .. } => f
                .debug_struct("CreateLoader")
                .field("binding", binding)
                .field("id", id)
                .field("url", &request.url.as_str())
                .finish_non_exhaustive(),
            FactoryEvent::Loader { id, command } => {
                f.debug_struct("Loader").field("id", id).field("command", command).finish()
            }
            FactoryEvent::Upstream { key, event } => {
                f.debug_struct("Upstream").field("key", key).field("event", event).finish()
            }
            FactoryEvent::Clone(binding) => f.debug_tuple("Clone").field(binding).finish(),
            FactoryEvent::BindingClosed(binding) => f.debug_tuple("BindingClosed").field(binding).finish(),
            FactoryEvent::UpstreamFactoryDisconnected => f.write_str("UpstreamFactoryDisconnected"),
        }
    }
}

/// Whether a factory is still running after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryStatus {
    Alive,
    Removed,
}

/// Called once when a factory removes itself
pub type RemovalCallback = Box<dyn FnOnce(ProxyId) + Send>;

/// Sits in front of one upstream factory on behalf of one frame
pub struct InterceptingLoaderFactory {
    proxy_id: ProxyId,
    render_process_id: i32,
    frame_id: FrameId,
    env: InterceptionEnv,
    upstream: Option<Box<dyn UpstreamLoaderFactory>>,
    bindings: HashSet<BindingId>,
    requests: HashMap<RequestId, InFlightRequest>,
    events_tx: mpsc::UnboundedSender<FactoryEvent>,
    events_rx: mpsc::UnboundedReceiver<FactoryEvent>,
    binding_ids: Arc<AtomicU64>,
    request_ids: Arc<AtomicU64>,
    gate: Arc<BindingGate>,
    on_removed: Option<RemovalCallback>,
    removed: bool,
}

impl fmt::Debug for InterceptingLoaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingLoaderFactory")
            .field("proxy_id", &self.proxy_id)
            .field("render_process_id", &self.render_process_id)
            .field("frame_id", &self.frame_id)
            .field("upstream_bound", &self.upstream.is_some())
            .field("bindings", &self.bindings)
            .field("requests", &self.requests.len())
            .field("removed", &self.removed)
            .finish()
    }
}

impl InterceptingLoaderFactory {
    /// Creates a factory and its first caller binding. Request ids come from
    /// `request_ids`, which is shared by every factory of a registry.
    pub fn new(
        proxy_id: ProxyId,
        render_process_id: i32,
        frame_id: FrameId,
        env: InterceptionEnv,
        upstream: Box<dyn UpstreamLoaderFactory>,
        request_ids: Arc<AtomicU64>,
    ) -> (Self, FactoryHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let binding_ids = Arc::new(AtomicU64::new(0));
        let first = binding_ids.fetch_add(1, Ordering::Relaxed);

        let mut bindings = HashSet::new();
        bindings.insert(first);
        let gate = Arc::new(BindingGate::with_first_binding());

        let factory = Self {
            proxy_id,
            render_process_id,
            frame_id,
            env,
            upstream: Some(upstream),
            bindings,
            requests: HashMap::new(),
            events_tx: events_tx.clone(),
            events_rx,
            binding_ids: binding_ids.clone(),
            request_ids: request_ids.clone(),
            gate: gate.clone(),
            on_removed: None,
            removed: false,
        };
        let handle = FactoryHandle {
            binding: first,
            events: events_tx,
            binding_ids,
            request_ids,
            gate,
        };
        (factory, handle)
    }

    pub fn set_removal_callback(&mut self, callback: RemovalCallback) {
        self.on_removed = Some(callback);
    }

    pub fn proxy_id(&self) -> ProxyId {
        self.proxy_id
    }

    /// For whoever watches the upstream factory's connection
    pub fn upstream_notifier(&self) -> UpstreamNotifier {
        UpstreamNotifier { events: self.events_tx.clone() }
    }

    /// Creates a new caller binding without going through an existing one
    pub(crate) fn binder(&self) -> Binder {
        Binder {
            events: self.events_tx.clone(),
            binding_ids: self.binding_ids.clone(),
            request_ids: self.request_ids.clone(),
            gate: self.gate.clone(),
        }
    }

    pub fn request(&self, id: RequestId) -> Option<&InFlightRequest> {
        self.requests.get(&id)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Handles one event
    pub fn handle_event(&mut self, event: FactoryEvent) -> FactoryStatus {
        if self.removed {
            log::debug!("Factory {} already removed, dropping {:?}", self.proxy_id, event);
            if let FactoryEvent::CreateLoader { mut client, .. } = event {
                let _ = client.on_complete(&CompletionStatus::new(NetError::Aborted));
            }
            return FactoryStatus::Removed;
        }

        match event {
            FactoryEvent::CreateLoader { binding, id, network_request_id, options, request, client } => {
                self.create_loader_and_start(binding, id, network_request_id, options, request, client);
            }
            FactoryEvent::Loader { id, command } => {
                let mut port = FactoryPort {
                    upstream: &mut self.upstream,
                    events: &self.events_tx,
                    env: &self.env,
                };
                let disposition = match self.requests.get_mut(&id) {
                    Some(request) => request.handle_command(command, &mut port),
                    None => {
                        log::debug!("Loader call for finished request {} ignored", id);
                        Disposition::Continue
                    }
                };
                if disposition == Disposition::Finished {
                    self.remove_request(id);
                }
            }
            FactoryEvent::Upstream { key, event } => {
                let disposition = match self.requests.get_mut(&key.id) {
                    Some(request) if request.key() == key => request.handle_upstream(event),
                    _ => {
                        log::debug!("Stale upstream event for {:?} ignored", key);
                        Disposition::Continue
                    }
                };
                if disposition == Disposition::Finished {
                    self.remove_request(key.id);
                }
            }
            FactoryEvent::Clone(binding) => {
                if self.upstream.is_some() {
                    self.bindings.insert(binding);
                } else {
                    log::debug!("Factory {} lost its upstream, binding {} refused", self.proxy_id, binding);
                }
            }
            FactoryEvent::BindingClosed(binding) => self.on_proxy_binding_error(binding),
            FactoryEvent::UpstreamFactoryDisconnected => self.on_target_factory_error(),
        }

        self.maybe_remove()
    }

    /// Handles every queued event without waiting for more
    pub fn pump(&mut self) -> FactoryStatus {
        while let Ok(event) = self.events_rx.try_recv() {
            if self.handle_event(event) == FactoryStatus::Removed {
                return FactoryStatus::Removed;
            }
        }
        if self.removed {
            FactoryStatus::Removed
        } else {
            FactoryStatus::Alive
        }
    }

    /// Runs the factory until it removes itself
    pub async fn run(mut self) {
        log::debug!("Factory {} started for frame {}", self.proxy_id, self.frame_id);
        while let Some(event) = self.events_rx.recv().await {
            if self.handle_event(event) == FactoryStatus::Removed {
                break;
            }
        }
    }

    fn create_loader_and_start(
        &mut self,
        binding: BindingId,
        id: RequestId,
        network_request_id: i32,
        options: u32,
        request: ResourceRequest,
        mut client: Box<dyn UrlLoaderClient>,
    ) {
        if !self.bindings.contains(&binding) {
            log::debug!("Request {} on closed binding {} aborted", id, binding);
            let _ = client.on_complete(&CompletionStatus::new(NetError::Aborted));
            return;
        }

        let mut request = InFlightRequest::new(id, network_request_id, self.frame_id, options, request, client);
        let mut port = FactoryPort {
            upstream: &mut self.upstream,
            events: &self.events_tx,
            env: &self.env,
        };
        if request.restart(&mut port) == Disposition::Continue {
            self.requests.insert(id, request);
        }
    }

    fn remove_request(&mut self, id: RequestId) {
        self.requests.remove(&id);
    }

    fn on_target_factory_error(&mut self) {
        log::debug!("Upstream factory of proxy {} disconnected", self.proxy_id);
        self.upstream = None;
        self.bindings.clear();
        self.gate.close();
    }

    fn on_proxy_binding_error(&mut self, binding: BindingId) {
        self.bindings.remove(&binding);
        // A clone may still be queued behind this close; the gate counts it
        if self.gate.live.load(Ordering::Acquire) == 0 {
            self.upstream = None;
            self.gate.close();
        }
    }

    /// Removes the factory once it has no upstream and no live request
    fn maybe_remove(&mut self) -> FactoryStatus {
        if self.upstream.is_some() || !self.requests.is_empty() {
            return FactoryStatus::Alive;
        }

        self.removed = true;
        self.gate.close();
        log::info!(
            "Removing proxy {} (process {}, frame {})",
            self.proxy_id,
            self.render_process_id,
            self.frame_id
        );
        if let Some(callback) = self.on_removed.take() {
            callback(self.proxy_id);
        }
        FactoryStatus::Removed
    }
}

/// A caller binding of a factory.
///
/// Cloning registers another binding on the same factory; dropping closes
/// this one.
pub struct FactoryHandle {
    binding: BindingId,
    events: mpsc::UnboundedSender<FactoryEvent>,
    binding_ids: Arc<AtomicU64>,
    request_ids: Arc<AtomicU64>,
    gate: Arc<BindingGate>,
}

impl fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryHandle")
            .field("binding", &self.binding)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl FactoryHandle {
    pub fn binding_id(&self) -> BindingId {
        self.binding
    }

    /// False once the factory has removed itself
    pub fn is_connected(&self) -> bool {
        !self.events.is_closed()
    }

    /// Starts an intercepted load. Progress is reported to `client`; the
    /// returned handle controls the load and cancels it when dropped.
    pub fn create_loader_and_start<C>(
        &self,
        network_request_id: i32,
        options: u32,
        request: ResourceRequest,
        client: C,
    ) -> LoaderHandle
    where
        C: UrlLoaderClient + 'static,
    {
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        let client: Box<dyn UrlLoaderClient> = match client.closed() {
            Some(closed) => {
                let (released_tx, released_rx) = oneshot::channel();
                watch_client(id, closed, released_rx, self.events.clone());
                Box::new(WatchedClient { inner: Box::new(client), _released: released_tx })
            }
            None => Box::new(client),
        };

        let event = FactoryEvent::CreateLoader {
            binding: self.binding,
            id,
            network_request_id,
            options,
            request,
            client,
        };
        if let Err(mpsc::error::SendError(event)) = self.events.send(event) {
            if let FactoryEvent::CreateLoader { mut client, .. } = event {
                let _ = client.on_complete(&CompletionStatus::new(NetError::Aborted));
            }
        }

        LoaderHandle::new(id, self.events.clone())
    }
}

/// Cancels request `id` once its client stops listening. Needs a runtime;
/// without one the disconnect is noticed on the next callback instead.
///
/// The watcher gives up when `released` fires, which happens when the
/// request drops its client, so a finished request leaves nothing behind
/// that keeps the caller's channel open.
fn watch_client(
    id: RequestId,
    closed: BoxFuture<'static, ()>,
    released: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<FactoryEvent>,
) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            tokio::select! {
                _ = closed => {
                    let _ = events.send(FactoryEvent::Loader { id, command: LoaderCommand::ClientClosed });
                }
                _ = released => {}
            }
        });
    }
}

/// A caller client with a disconnect watcher; dropping it stops the watcher
struct WatchedClient {
    inner: Box<dyn UrlLoaderClient>,
    _released: oneshot::Sender<()>,
}

impl UrlLoaderClient for WatchedClient {
    fn on_receive_response(
        &mut self,
        head: ResponseHead,
        body: Option<ResponseBody>,
        cached_metadata: Option<Bytes>,
    ) -> Result<(), NetworkError> {
        self.inner.on_receive_response(head, body, cached_metadata)
    }

    fn on_receive_redirect(&mut self, info: &RedirectInfo, head: ResponseHead) -> Result<(), NetworkError> {
        self.inner.on_receive_redirect(info, head)
    }

    fn on_upload_progress(
        &mut self,
        current_position: i64,
        total_size: i64,
        ack: oneshot::Sender<()>,
    ) -> Result<(), NetworkError> {
        self.inner.on_upload_progress(current_position, total_size, ack)
    }

    fn on_transfer_size_updated(&mut self, transfer_size_diff: i32) -> Result<(), NetworkError> {
        self.inner.on_transfer_size_updated(transfer_size_diff)
    }

    fn on_complete(&mut self, status: &CompletionStatus) -> Result<(), NetworkError> {
        self.inner.on_complete(status)
    }
}

impl Clone for FactoryHandle {
    fn clone(&self) -> Self {
        let binding = self.binding_ids.fetch_add(1, Ordering::Relaxed);
        self.gate.live.fetch_add(1, Ordering::AcqRel);
        let _ = self.events.send(FactoryEvent::Clone(binding));
        Self {
            binding,
            events: self.events.clone(),
            binding_ids: self.binding_ids.clone(),
            request_ids: self.request_ids.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl Drop for FactoryHandle {
    fn drop(&mut self) {
        self.gate.live.fetch_sub(1, Ordering::AcqRel);
        let _ = self.events.send(FactoryEvent::BindingClosed(self.binding));
    }
}

/// Whether a factory still takes new bindings. Shared by the factory and
/// every handle so the answer does not wait on the event queue.
#[derive(Debug)]
struct BindingGate {
    live: AtomicUsize,
    closed: AtomicBool,
}

impl BindingGate {
    fn with_first_binding() -> Self {
        Self { live: AtomicUsize::new(1), closed: AtomicBool::new(false) }
    }

    /// Counts a new binding unless the factory dropped its upstream or the
    /// last binding is already gone
    fn enter(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                if live == 0 {
                    None
                } else {
                    Some(live + 1)
                }
            })
            .is_ok()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Creates fresh bindings on a factory without holding one
#[derive(Clone)]
pub(crate) struct Binder {
    events: mpsc::UnboundedSender<FactoryEvent>,
    binding_ids: Arc<AtomicU64>,
    request_ids: Arc<AtomicU64>,
    gate: Arc<BindingGate>,
}

impl Binder {
    /// `None` once the factory stopped taking bindings, which happens when
    /// it drops its upstream
    pub(crate) fn bind(&self) -> Option<FactoryHandle> {
        if !self.gate.enter() {
            return None;
        }
        let binding = self.binding_ids.fetch_add(1, Ordering::Relaxed);
        let handle = FactoryHandle {
            binding,
            events: self.events.clone(),
            binding_ids: self.binding_ids.clone(),
            request_ids: self.request_ids.clone(),
            gate: self.gate.clone(),
        };
        if self.events.send(FactoryEvent::Clone(binding)).is_err() {
            // Dropping the handle undoes the count
            return None;
        }
        Some(handle)
    }
}

/// Tells a factory its upstream factory went away
#[derive(Debug, Clone)]
pub struct UpstreamNotifier {
    events: mpsc::UnboundedSender<FactoryEvent>,
}

impl UpstreamNotifier {
    pub fn upstream_disconnected(&self) {
        let _ = self.events.send(FactoryEvent::UpstreamFactoryDisconnected);
    }
}
