#![allow(dead_code)]

use std::sync::Arc;

use bulwark_networking::{
    ChannelClient, ClientMessage, FollowRedirectParams, FrameId, FrameLookup, FrameShieldsData,
    InterceptingLoaderFactory, InterceptionEnv, NetworkError, ProxyBinding, ProxyConfig, RequestPriority,
    RequestRegistry, ResourceRequest, UpstreamClient, UpstreamLoader, UpstreamLoaderFactory,
};
use bulwark_shields::{InMemorySettings, PolicyLevel};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

/// Calls an upstream loader received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderCall {
    FollowRedirect(FollowRedirectParams),
    SetPriority(RequestPriority, i32),
    Pause,
    Resume,
}

/// One load started on the fake network
pub struct UpstreamLoad {
    pub request: ResourceRequest,
    pub client: Option<UpstreamClient>,
    pub calls: Vec<LoaderCall>,
}

/// Everything the fake network saw
#[derive(Clone, Default)]
pub struct UpstreamLog(Arc<Mutex<Vec<UpstreamLoad>>>);

impl UpstreamLog {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn url(&self, index: usize) -> String {
        self.0.lock()[index].request.url.to_string()
    }

    pub fn request(&self, index: usize) -> ResourceRequest {
        self.0.lock()[index].request.clone()
    }

    pub fn calls(&self, index: usize) -> Vec<LoaderCall> {
        self.0.lock()[index].calls.clone()
    }

    /// Takes the client of load `index` so a test can answer on it
    pub fn take_client(&self, index: usize) -> UpstreamClient {
        self.0.lock()[index]
            .client
            .take()
            .expect("upstream client already taken")
    }
}

pub struct FakeUpstream {
    pub log: UpstreamLog,
}

impl UpstreamLoaderFactory for FakeUpstream {
    fn create_loader_and_start(
        &mut self,
        _network_request_id: i32,
        _options: u32,
        request: &ResourceRequest,
        client: UpstreamClient,
    ) -> Result<Box<dyn UpstreamLoader>, NetworkError> {
        let mut loads = self.log.0.lock();
        loads.push(UpstreamLoad {
            request: request.clone(),
            client: Some(client),
            calls: Vec::new(),
        });
        Ok(Box::new(FakeLoader {
            index: loads.len() - 1,
            log: self.log.clone(),
        }))
    }
}

struct FakeLoader {
    index: usize,
    log: UpstreamLog,
}

impl FakeLoader {
    fn record(&self, call: LoaderCall) {
        self.log.0.lock()[self.index].calls.push(call);
    }
}

impl UpstreamLoader for FakeLoader {
    fn follow_redirect(&mut self, params: FollowRedirectParams) {
        self.record(LoaderCall::FollowRedirect(params));
    }

    fn set_priority(&mut self, priority: RequestPriority, intra_priority_value: i32) {
        self.record(LoaderCall::SetPriority(priority, intra_priority_value));
    }

    fn pause_reading_body_from_net(&mut self) {
        self.record(LoaderCall::Pause);
    }

    fn resume_reading_body_from_net(&mut self) {
        self.record(LoaderCall::Resume);
    }
}

/// Every frame shows the same page
pub struct Tab(pub Url);

impl FrameLookup for Tab {
    fn last_committed_url(&self, _frame_id: FrameId) -> Option<Url> {
        Some(self.0.clone())
    }
}

pub const FRAME: FrameId = 4;

pub struct Harness {
    pub registry: RequestRegistry,
    pub factory: InterceptingLoaderFactory,
    pub binding: ProxyBinding,
    pub upstream: UpstreamLog,
    pub reports: Arc<FrameShieldsData>,
}

pub fn env_with(tab: &str, level: PolicyLevel, config: ProxyConfig) -> (InterceptionEnv, Arc<FrameShieldsData>) {
    let reports = Arc::new(FrameShieldsData::new());
    let env = InterceptionEnv::new(
        config,
        Arc::new(InMemorySettings::with_default(level)),
        Arc::new(Tab(Url::parse(tab).expect("Failed to parse tab URL"))),
        reports.clone(),
    );
    (env, reports)
}

pub fn harness_with(tab: &str, level: PolicyLevel, config: ProxyConfig) -> Harness {
    let (env, reports) = env_with(tab, level, config);
    let registry = RequestRegistry::new(env);
    let upstream = UpstreamLog::default();
    let (factory, binding) = registry.create_proxy(1, FRAME, Box::new(FakeUpstream { log: upstream.clone() }));
    Harness {
        registry,
        factory,
        binding,
        upstream,
        reports,
    }
}

pub fn harness(tab: &str, level: PolicyLevel) -> Harness {
    harness_with(tab, level, ProxyConfig::default())
}

pub fn client() -> (ChannelClient, mpsc::UnboundedReceiver<ClientMessage>) {
    ChannelClient::new()
}

/// Everything the caller has received so far
pub fn drain(receiver: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}
