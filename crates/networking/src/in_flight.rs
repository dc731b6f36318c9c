//! The per-request state machine.
//!
//! An [`InFlightRequest`] sits between the caller and one upstream loader.
//! It is owned by its factory and only ever driven from the factory's event
//! loop, one event at a time. Every entry point returns a [`Disposition`];
//! `Finished` means the request reached `Completed` and the factory must drop
//! it.

use std::time::Instant;

use tokio::sync::mpsc;
use url::{Origin, Url};

use crate::context::{FrameId, InterceptionEnv, RedirectLineage, RequestContext, RequestId};
use crate::error::{NetError, NetworkError};
use crate::factory::FactoryEvent;
use crate::loader::{
    FollowRedirectParams, LoaderCommand, RequestKey, UpstreamClient, UpstreamEvent, UpstreamLoader,
    UpstreamLoaderFactory, UrlLoaderClient,
};
use crate::request::{Method, ResourceRequest, REFERER};
use crate::response::{CompletionStatus, RedirectInfo, RedirectSource, ResponseHead};
use crate::site_hacks;

/// Where a request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Created,
    BeforeSendHeaders,
    SendingHeaders,
    EmittingSyntheticRedirect,
    Started,
    AwaitingUpstream,
    ResponseStarted,
    BeforeRedirect,
    Completed,
}

/// What the factory does with a request after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Finished,
}

/// The parts of the owning factory a request may use while handling an event
pub(crate) struct FactoryPort<'a> {
    pub(crate) upstream: &'a mut Option<Box<dyn UpstreamLoaderFactory>>,
    pub(crate) events: &'a mpsc::UnboundedSender<FactoryEvent>,
    pub(crate) env: &'a InterceptionEnv,
}

/// One intercepted load
pub struct InFlightRequest {
    id: RequestId,
    network_request_id: i32,
    frame_id: FrameId,
    options: u32,
    request: ResourceRequest,
    client: Box<dyn UrlLoaderClient>,
    state: RequestState,
    ctx: Option<RequestContext>,
    lineage: RedirectLineage,
    redirect_url: Option<Url>,
    generation: u64,
    target_loader: Option<Box<dyn UpstreamLoader>>,
    pending_follow_redirect: Option<FollowRedirectParams>,
    /// The caller has already been told how this hop ended
    request_completed: bool,
    start_time: Instant,
}

impl std::fmt::Debug for InFlightRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRequest")
            .field("id", &self.id)
            .field("url", &self.request.url.as_str())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("lineage", &self.lineage)
            .finish_non_exhaustive()
    }
}

impl InFlightRequest {
    pub(crate) fn new(
        id: RequestId,
        network_request_id: i32,
        frame_id: FrameId,
        options: u32,
        request: ResourceRequest,
        client: Box<dyn UrlLoaderClient>,
    ) -> Self {
        Self {
            id,
            network_request_id,
            frame_id,
            options,
            request,
            client,
            state: RequestState::Created,
            ctx: None,
            lineage: RedirectLineage::default(),
            redirect_url: None,
            generation: 0,
            target_loader: None,
            pending_follow_redirect: None,
            request_completed: false,
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// The request as it would go upstream now
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    pub fn lineage(&self) -> &RedirectLineage {
        &self.lineage
    }

    /// Context of the current hop
    pub fn context(&self) -> Option<&RequestContext> {
        self.ctx.as_ref()
    }

    /// Key the current upstream binding reports under
    pub fn key(&self) -> RequestKey {
        RequestKey { id: self.id, generation: self.generation }
    }

    /// Starts a new hop: fresh context, decision pipeline, then on to the
    /// network or back to the caller with a synthetic redirect.
    pub(crate) fn restart(&mut self, port: &mut FactoryPort<'_>) -> Disposition {
        self.request_completed = false;
        self.start_time = Instant::now();
        self.state = RequestState::BeforeSendHeaders;
        self.redirect_url = None;

        let env = port.env;
        let ctx = RequestContext::build(
            &self.request,
            self.frame_id,
            self.id,
            env,
            self.lineage.clone(),
            self.ctx.as_ref(),
        );
        let ctx = self.ctx.insert(ctx);
        if env.config.enabled {
            self.redirect_url =
                site_hacks::on_before_url_request(ctx, &env.config.shields, env.reports.as_ref());
        }

        self.continue_to_before_send_headers(port)
    }

    fn continue_to_before_send_headers(&mut self, port: &mut FactoryPort<'_>) -> Disposition {
        if let Some(redirect_url) = self.redirect_url.take() {
            return self.handle_before_request_redirect(redirect_url, port);
        }

        if let Some(referrer) = self.ctx.as_ref().and_then(RequestContext::rewritten_referrer) {
            if let Some(url) = referrer.as_url() {
                self.request.headers.set(REFERER, url.as_str());
            }
            self.request.referrer = referrer.clone().into_url();
        }

        self.continue_to_send_headers(port)
    }

    fn continue_to_send_headers(&mut self, port: &mut FactoryPort<'_>) -> Disposition {
        self.state = RequestState::SendingHeaders;

        if let Some(ctx) = self.ctx.as_ref() {
            for name in ctx.headers_to_remove() {
                self.request.headers.remove(name);
            }

            if let Some(mut params) = self.pending_follow_redirect.take() {
                params
                    .removed_headers
                    .extend(ctx.headers_to_remove().iter().cloned());
                for name in ctx.headers_to_set() {
                    if let Some(value) = self.request.headers.get(name) {
                        params.modified_headers.set(name, value);
                    }
                }
                if let Some(loader) = self.target_loader.as_mut() {
                    loader.follow_redirect(params);
                }
            }
        }

        self.continue_to_start_request(port)
    }

    fn continue_to_start_request(&mut self, port: &mut FactoryPort<'_>) -> Disposition {
        self.state = RequestState::Started;

        if self.target_loader.is_none() {
            let factory = match port.upstream.as_mut() {
                Some(factory) => factory,
                None => {
                    log::debug!("No upstream factory for request {}", self.id);
                    return self.on_request_error(NetError::Failed.into());
                }
            };

            self.generation += 1;
            let client = UpstreamClient::new(self.key(), port.events.clone());
            match factory.create_loader_and_start(self.network_request_id, self.options, &self.request, client) {
                Ok(loader) => self.target_loader = Some(loader),
                Err(e) => {
                    log::debug!("Upstream refused request {}: {}", self.id, e);
                    if matches!(e, NetworkError::UpstreamUnavailable) {
                        let _ = port.events.send(FactoryEvent::UpstreamFactoryDisconnected);
                    }
                    return self.on_request_error(CompletionStatus::from(&e));
                }
            }
        }

        // From here on the request is driven by upstream and caller events
        self.state = RequestState::AwaitingUpstream;
        Disposition::Continue
    }

    /// Sends the caller to `redirect_url` without asking the network.
    fn handle_before_request_redirect(&mut self, redirect_url: Url, port: &mut FactoryPort<'_>) -> Disposition {
        self.state = RequestState::EmittingSyntheticRedirect;

        // The current loader knows nothing of the redirect; a new one is
        // created once the caller follows it.
        self.target_loader = None;
        self.pending_follow_redirect = None;
        self.generation += 1;

        let status = port.env.config.synthetic_redirect_status;
        let info = RedirectInfo::compute(self.redirect_source(), status, redirect_url.clone(), None);
        let head = ResponseHead::synthetic_redirect(status, &redirect_url);

        // Tainted origin flag of the fetch redirect algorithm. The query
        // filter keeps the origin, so today this never fires.
        if let Some(initiator) = &self.request.request_initiator {
            let current = self.request.url.origin();
            if redirect_url.origin() != current && *initiator != current {
                self.request.request_initiator = Some(Origin::new_opaque());
            }
        }

        log::debug!("Request {}: internal redirect to {}", self.id, redirect_url);
        self.lineage.internal_redirect = true;
        self.continue_to_before_redirect(info, head)
    }

    fn redirect_source(&self) -> RedirectSource<'_> {
        RedirectSource {
            method: &self.request.method,
            url: &self.request.url,
            site_for_cookies: self.request.site_for_cookies.as_ref(),
            update_first_party_url_on_redirect: self.request.update_first_party_url_on_redirect,
            referrer_policy: self.request.referrer_policy,
            referrer: self.request.referrer.as_ref(),
        }
    }

    fn continue_to_before_redirect(&mut self, info: RedirectInfo, head: ResponseHead) -> Disposition {
        self.state = RequestState::BeforeRedirect;

        self.lineage.redirect_source = if self.lineage.internal_redirect {
            None
        } else {
            Some(self.request.url.clone())
        };

        if let Err(e) = self.client.on_receive_redirect(&info, head) {
            return self.on_client_gone(e);
        }

        self.request.url = info.new_url;
        self.request.method = info.new_method;
        self.request.site_for_cookies = info.new_site_for_cookies;
        self.request.referrer = info.new_referrer;
        self.request.referrer_policy = info.new_referrer_policy;
        // The next hop decides the header again from the new referrer
        self.request.headers.remove(REFERER);
        if self.request.method == Method::GET {
            self.request.body = None;
        }

        self.request_completed = true;
        Disposition::Continue
    }

    /// A call from the caller's loader binding
    pub(crate) fn handle_command(&mut self, command: LoaderCommand, port: &mut FactoryPort<'_>) -> Disposition {
        match command {
            LoaderCommand::FollowRedirect(params) => self.follow_redirect(params, port),
            LoaderCommand::SetPriority { priority, intra_priority_value } => {
                if let Some(loader) = self.target_loader.as_mut() {
                    loader.set_priority(priority, intra_priority_value);
                }
                Disposition::Continue
            }
            LoaderCommand::PauseReadingBodyFromNet => {
                if let Some(loader) = self.target_loader.as_mut() {
                    loader.pause_reading_body_from_net();
                }
                Disposition::Continue
            }
            LoaderCommand::ResumeReadingBodyFromNet => {
                if let Some(loader) = self.target_loader.as_mut() {
                    loader.resume_reading_body_from_net();
                }
                Disposition::Continue
            }
            LoaderCommand::ClientClosed | LoaderCommand::Closed => {
                log::debug!("Caller went away from request {}", self.id);
                self.on_request_error(NetError::Aborted.into())
            }
        }
    }

    fn follow_redirect(&mut self, params: FollowRedirectParams, port: &mut FactoryPort<'_>) -> Disposition {
        if self.state != RequestState::BeforeRedirect {
            log::debug!("Request {}: follow_redirect in state {:?} ignored", self.id, self.state);
            return Disposition::Continue;
        }

        if let Some(new_url) = &params.new_url {
            self.request.url = new_url.clone();
        }
        for name in &params.removed_headers {
            self.request.headers.remove(name);
        }
        self.request.headers.merge_from(&params.modified_headers);

        // Replayed to the upstream loader once the new hop is decided
        if self.target_loader.is_some() {
            self.pending_follow_redirect = Some(params);
        }

        self.restart(port)
    }

    /// A callback from the current upstream loader
    pub(crate) fn handle_upstream(&mut self, event: UpstreamEvent) -> Disposition {
        match event {
            // Not relayed
            UpstreamEvent::EarlyHints(_) => Disposition::Continue,
            UpstreamEvent::Response { head, body, cached_metadata } => {
                self.lineage.internal_redirect = false;
                self.state = RequestState::ResponseStarted;
                match self.client.on_receive_response(head, body, cached_metadata) {
                    Ok(()) => Disposition::Continue,
                    Err(e) => self.on_client_gone(e),
                }
            }
            UpstreamEvent::Redirect { info, head } => {
                self.lineage.internal_redirect = false;
                self.continue_to_before_redirect(info, head)
            }
            UpstreamEvent::UploadProgress { current_position, total_size, ack } => {
                match self.client.on_upload_progress(current_position, total_size, ack) {
                    Ok(()) => Disposition::Continue,
                    Err(e) => self.on_client_gone(e),
                }
            }
            UpstreamEvent::TransferSizeUpdated(diff) => match self.client.on_transfer_size_updated(diff) {
                Ok(()) => Disposition::Continue,
                Err(e) => self.on_client_gone(e),
            },
            UpstreamEvent::Complete(status) => self.on_complete(status),
            UpstreamEvent::Disconnected => {
                log::debug!("Upstream loader for request {} went away", self.id);
                self.on_request_error(NetError::Failed.into())
            }
        }
    }

    fn on_complete(&mut self, status: CompletionStatus) -> Disposition {
        log::debug!(
            "Request {} to {} finished with {} after {:?}",
            self.id,
            self.request.url,
            status.error_code,
            self.start_time.elapsed()
        );
        if !status.is_ok() {
            return self.on_request_error(status);
        }

        self.state = RequestState::Completed;
        // Nothing is left to cancel if the caller is gone
        let _ = self.client.on_complete(&status);
        Disposition::Finished
    }

    fn on_client_gone(&mut self, error: NetworkError) -> Disposition {
        log::debug!("Request {}: {}", self.id, error);
        self.on_request_error(CompletionStatus::from(&error))
    }

    fn on_request_error(&mut self, status: CompletionStatus) -> Disposition {
        if !self.request_completed {
            let _ = self.client.on_complete(&status);
        }
        log::debug!("Request {} failed with {}", self.id, status.error_code);
        self.state = RequestState::Completed;
        Disposition::Finished
    }
}
