use std::error::Error;
use std::sync::Arc;

use bulwark_networking::{
    ChannelClient, ClientMessage, CompletionStatus, FollowRedirectParams, FrameId, FrameLookup, FrameShieldsData,
    InterceptionEnv, Method, NetworkError, ProxyConfig, RequestPriority, RequestRegistry, ResourceRequest,
    ResponseHead, UpstreamClient, UpstreamLoader, UpstreamLoaderFactory,
};
use bulwark_shields::{InMemorySettings, PolicyLevel};
use url::Url;

/// Answers every load with an empty 200
struct LoopbackNetwork;

struct LoopbackLoader;

impl UpstreamLoader for LoopbackLoader {
    fn follow_redirect(&mut self, _params: FollowRedirectParams) {}
    fn set_priority(&mut self, _priority: RequestPriority, _intra_priority_value: i32) {}
    fn pause_reading_body_from_net(&mut self) {}
    fn resume_reading_body_from_net(&mut self) {}
}

impl UpstreamLoaderFactory for LoopbackNetwork {
    fn create_loader_and_start(
        &mut self,
        _network_request_id: i32,
        _options: u32,
        request: &ResourceRequest,
        client: UpstreamClient,
    ) -> Result<Box<dyn UpstreamLoader>, NetworkError> {
        println!("  network <- {} {}", request.method, request.url);
        if let Some(referrer) = &request.referrer {
            println!("  network <- Referer: {}", referrer);
        }
        tokio::spawn(async move {
            client.on_receive_response(ResponseHead::new(200, "OK"), None, None);
            client.on_complete(CompletionStatus::ok());
        });
        Ok(Box::new(LoopbackLoader))
    }
}

struct Page(Url);

impl FrameLookup for Page {
    fn last_committed_url(&self, _frame_id: FrameId) -> Option<Url> {
        Some(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let reports = Arc::new(FrameShieldsData::new());
    let env = InterceptionEnv::new(
        ProxyConfig::default(),
        Arc::new(InMemorySettings::with_default(PolicyLevel::Block)),
        Arc::new(Page(Url::parse("https://news.example/story")?)),
        reports.clone(),
    );
    let registry = RequestRegistry::new(env);
    let binding = registry.start_proxying(1, 1, Box::new(LoopbackNetwork));

    let urls = [
        "https://shop.example/item?id=42&fbclid=IwAR0abc&gclid=Cj0K",
        "https://cdn.example/app.js?v=3",
    ];
    for url in urls {
        println!("\nLoading {}", url);
        let request = ResourceRequest::new(Method::GET, url)?
            .with_initiator("https://news.example/")?
            .with_referrer("https://news.example/story?id=7")?;
        let (client, mut rx) = ChannelClient::new();
        let loader = binding.handle.create_loader_and_start(0, 0, request, client);

        while let Some(message) = rx.recv().await {
            match message {
                ClientMessage::Redirect { info, head } => {
                    println!("  caller  -> {} to {}", head.status_line(), info.new_url);
                    loader.follow_redirect(FollowRedirectParams::default());
                }
                ClientMessage::Response { head, .. } => println!("  caller  -> {}", head.status_line()),
                ClientMessage::Complete(status) => {
                    println!("  caller  -> completed: {}", status.error_code);
                    break;
                }
                _ => {}
            }
        }
    }

    println!("\nTrackers blocked in frame 1: {:?}", reports.blocked_trackers(1));
    Ok(())
}
