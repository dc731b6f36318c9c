//! Loader protocol seams.
//!
//! The caller talks to the interception layer through a [`LoaderHandle`] and
//! listens on a [`UrlLoaderClient`]. The interception layer in turn talks to
//! the real network through an [`UpstreamLoaderFactory`] and hands every
//! upstream loader an [`UpstreamClient`] to report back on.

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::context::RequestId;
use crate::error::NetworkError;
use crate::factory::FactoryEvent;
use crate::request::{HttpHeaders, RequestPriority, ResourceRequest};
use crate::response::{CompletionStatus, RedirectInfo, ResponseBody, ResponseHead};

/// Identifies one upstream binding of one request. The generation changes
/// every time the request drops its upstream loader, so events from an
/// abandoned loader can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub id: RequestId,
    pub generation: u64,
}

/// Header edits sent along with a redirect follow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowRedirectParams {
    pub removed_headers: Vec<String>,
    pub modified_headers: HttpHeaders,
    pub modified_cors_exempt_headers: HttpHeaders,
    pub new_url: Option<Url>,
}

/// The caller's side of a load.
///
/// An `Err` from any callback means the caller is gone, which cancels the
/// request.
pub trait UrlLoaderClient: Send {
    fn on_receive_response(
        &mut self,
        head: ResponseHead,
        body: Option<ResponseBody>,
        cached_metadata: Option<Bytes>,
    ) -> Result<(), NetworkError>;

    fn on_receive_redirect(&mut self, info: &RedirectInfo, head: ResponseHead) -> Result<(), NetworkError>;

    fn on_upload_progress(
        &mut self,
        current_position: i64,
        total_size: i64,
        ack: oneshot::Sender<()>,
    ) -> Result<(), NetworkError>;

    fn on_transfer_size_updated(&mut self, transfer_size_diff: i32) -> Result<(), NetworkError>;

    fn on_complete(&mut self, status: &CompletionStatus) -> Result<(), NetworkError>;

    /// Resolves when the caller stops listening. `None` if that cannot be
    /// observed.
    fn closed(&self) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

/// Messages delivered by a [`ChannelClient`]
#[derive(Debug)]
pub enum ClientMessage {
    Response {
        head: ResponseHead,
        body: Option<ResponseBody>,
        cached_metadata: Option<Bytes>,
    },
    Redirect {
        info: RedirectInfo,
        head: ResponseHead,
    },
    UploadProgress {
        current_position: i64,
        total_size: i64,
        ack: oneshot::Sender<()>,
    },
    TransferSizeUpdated(i32),
    Complete(CompletionStatus),
}

/// A [`UrlLoaderClient`] that forwards every callback over a channel
#[derive(Debug, Clone)]
pub struct ChannelClient {
    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl ChannelClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, message: ClientMessage) -> Result<(), NetworkError> {
        self.sender
            .send(message)
            .map_err(|_| NetworkError::ClientDisconnected)
    }
}

impl UrlLoaderClient for ChannelClient {
    fn on_receive_response(
        &mut self,
        head: ResponseHead,
        body: Option<ResponseBody>,
        cached_metadata: Option<Bytes>,
    ) -> Result<(), NetworkError> {
        self.send(ClientMessage::Response { head, body, cached_metadata })
    }

    fn on_receive_redirect(&mut self, info: &RedirectInfo, head: ResponseHead) -> Result<(), NetworkError> {
        self.send(ClientMessage::Redirect { info: info.clone(), head })
    }

    fn on_upload_progress(
        &mut self,
        current_position: i64,
        total_size: i64,
        ack: oneshot::Sender<()>,
    ) -> Result<(), NetworkError> {
        self.send(ClientMessage::UploadProgress { current_position, total_size, ack })
    }

    fn on_transfer_size_updated(&mut self, transfer_size_diff: i32) -> Result<(), NetworkError> {
        self.send(ClientMessage::TransferSizeUpdated(transfer_size_diff))
    }

    fn on_complete(&mut self, status: &CompletionStatus) -> Result<(), NetworkError> {
        self.send(ClientMessage::Complete(status.clone()))
    }

    fn closed(&self) -> Option<BoxFuture<'static, ()>> {
        let sender = self.sender.clone();
        Some(Box::pin(async move { sender.closed().await }))
    }
}

/// A loader created by the real network factory
pub trait UpstreamLoader: Send {
    fn follow_redirect(&mut self, params: FollowRedirectParams);

    fn set_priority(&mut self, priority: RequestPriority, intra_priority_value: i32);

    fn pause_reading_body_from_net(&mut self);

    fn resume_reading_body_from_net(&mut self);
}

/// The real network factory the interception layer sits in front of
pub trait UpstreamLoaderFactory: Send {
    /// Starts `request`; progress is reported through `client`.
    ///
    /// `Err(NetworkError::UpstreamUnavailable)` means the factory itself is
    /// gone.
    fn create_loader_and_start(
        &mut self,
        network_request_id: i32,
        options: u32,
        request: &ResourceRequest,
        client: UpstreamClient,
    ) -> Result<Box<dyn UpstreamLoader>, NetworkError>;
}

/// Callbacks from an upstream loader, tagged with their [`RequestKey`]
#[derive(Debug)]
pub enum UpstreamEvent {
    EarlyHints(HttpHeaders),
    Response {
        head: ResponseHead,
        body: Option<ResponseBody>,
        cached_metadata: Option<Bytes>,
    },
    Redirect {
        info: RedirectInfo,
        head: ResponseHead,
    },
    UploadProgress {
        current_position: i64,
        total_size: i64,
        ack: oneshot::Sender<()>,
    },
    TransferSizeUpdated(i32),
    Complete(CompletionStatus),
    /// The upstream loader dropped its client without completing
    Disconnected,
}

/// Handed to the upstream loader; every call becomes an event on the
/// owning factory's queue.
#[derive(Debug)]
pub struct UpstreamClient {
    key: RequestKey,
    events: Option<mpsc::UnboundedSender<FactoryEvent>>,
}

impl UpstreamClient {
    pub(crate) fn new(key: RequestKey, events: mpsc::UnboundedSender<FactoryEvent>) -> Self {
        Self { key, events: Some(events) }
    }

    pub fn key(&self) -> RequestKey {
        self.key
    }

    fn send(&self, event: UpstreamEvent) {
        if let Some(events) = &self.events {
            // The factory may already be gone
            let _ = events.send(FactoryEvent::Upstream { key: self.key, event });
        }
    }

    pub fn on_receive_early_hints(&self, headers: HttpHeaders) {
        self.send(UpstreamEvent::EarlyHints(headers));
    }

    pub fn on_receive_response(
        &self,
        head: ResponseHead,
        body: Option<ResponseBody>,
        cached_metadata: Option<Bytes>,
    ) {
        self.send(UpstreamEvent::Response { head, body, cached_metadata });
    }

    pub fn on_receive_redirect(&self, info: RedirectInfo, head: ResponseHead) {
        self.send(UpstreamEvent::Redirect { info, head });
    }

    /// Returns a receiver that fires once the caller has acknowledged the
    /// progress report.
    pub fn on_upload_progress(&self, current_position: i64, total_size: i64) -> oneshot::Receiver<()> {
        let (ack, acked) = oneshot::channel();
        self.send(UpstreamEvent::UploadProgress { current_position, total_size, ack });
        acked
    }

    pub fn on_transfer_size_updated(&self, transfer_size_diff: i32) {
        self.send(UpstreamEvent::TransferSizeUpdated(transfer_size_diff));
    }

    pub fn on_complete(mut self, status: CompletionStatus) {
        if let Some(events) = self.events.take() {
            let _ = events.send(FactoryEvent::Upstream {
                key: self.key,
                event: UpstreamEvent::Complete(status),
            });
        }
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        if let Some(events) = self.events.take() {
            let _ = events.send(FactoryEvent::Upstream {
                key: self.key,
                event: UpstreamEvent::Disconnected,
            });
        }
    }
}

/// Calls from the caller on its loader binding
#[derive(Debug)]
pub enum LoaderCommand {
    FollowRedirect(FollowRedirectParams),
    SetPriority {
        priority: RequestPriority,
        intra_priority_value: i32,
    },
    PauseReadingBodyFromNet,
    ResumeReadingBodyFromNet,
    /// The caller's client stopped listening
    ClientClosed,
    /// The caller dropped its loader binding
    Closed,
}

/// The caller's loader binding for one intercepted request.
///
/// Dropping it cancels the request if it is still running.
#[derive(Debug)]
pub struct LoaderHandle {
    id: RequestId,
    events: mpsc::UnboundedSender<FactoryEvent>,
}

impl LoaderHandle {
    pub(crate) fn new(id: RequestId, events: mpsc::UnboundedSender<FactoryEvent>) -> Self {
        Self { id, events }
    }

    /// Registry-unique id of the request behind this handle
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    fn send(&self, command: LoaderCommand) {
        let _ = self.events.send(FactoryEvent::Loader { id: self.id, command });
    }

    pub fn follow_redirect(&self, params: FollowRedirectParams) {
        self.send(LoaderCommand::FollowRedirect(params));
    }

    pub fn set_priority(&self, priority: RequestPriority, intra_priority_value: i32) {
        self.send(LoaderCommand::SetPriority { priority, intra_priority_value });
    }

    pub fn pause_reading_body_from_net(&self) {
        self.send(LoaderCommand::PauseReadingBodyFromNet);
    }

    pub fn resume_reading_body_from_net(&self) {
        self.send(LoaderCommand::ResumeReadingBodyFromNet);
    }
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        self.send(LoaderCommand::Closed);
    }
}
