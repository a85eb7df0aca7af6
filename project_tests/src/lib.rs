//! # Scenario Test Harness
//!
//! Wires a complete hub (router, transport, scheduler, scripted provider)
//! without sockets. A [`TestClient`] plays the part of one WebSocket client:
//! it sends JSON through the router and reads what the transport queued for
//! it.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use lib_hub::core::Incoming;
use lib_hub::provider::MemoryProvider;
use lib_hub::transport::CLOSE_CODE_INTERNAL;
use lib_hub::{
    ChannelTransport, ConnectionId, Hub, HubSettings, MessageRouter, Outbound, PollScheduler,
    Track,
};

pub struct TestHub {
    pub hub: Arc<Hub>,
    pub router: MessageRouter,
    pub transport: Arc<ChannelTransport>,
    pub provider: Arc<MemoryProvider>,
    pub scheduler: Arc<PollScheduler>,
}

impl TestHub {
    pub fn new() -> Self {
        Self::with_settings(HubSettings::default())
    }

    pub fn with_settings(settings: HubSettings) -> Self {
        let transport = Arc::new(ChannelTransport::new());
        let hub = Hub::new(settings, transport.clone());
        let provider = Arc::new(MemoryProvider::new());
        let scheduler = Arc::new(PollScheduler::new(hub.clone(), provider.clone()));
        Self {
            router: MessageRouter::new(hub.clone()),
            hub,
            transport,
            provider,
            scheduler,
        }
    }

    /// Accepts a connection without completing the handshake.
    pub fn connect_pending(&self) -> TestClient {
        let id = self.router.accept();
        let rx = self.transport.attach(id);
        TestClient {
            id,
            router: self.router.clone(),
            rx,
        }
    }

    /// Accepts and opens a connection. The ready frame is left in the queue.
    /// Needs a tokio runtime (the heartbeat timer is spawned).
    pub fn connect(&self) -> TestClient {
        let client = self.connect_pending();
        self.router.open(client.id);
        client
    }
}

impl Default for TestHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestClient {
    pub id: ConnectionId,
    router: MessageRouter,
    rx: UnboundedReceiver<Outbound>,
}

impl TestClient {
    pub fn send(&self, message: Value) {
        self.send_text(&message.to_string());
    }

    pub fn send_text(&self, text: &str) {
        self.router.on_message(self.id, Incoming::Text(text));
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        self.router.on_message(self.id, Incoming::Binary(bytes));
    }

    /// The next queued item, if any.
    pub fn next(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// The next queued text frame, parsed. Panics on anything else.
    pub fn next_json(&mut self) -> Value {
        match self.next() {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).expect("frame is JSON"),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    /// Asserts the `{op:-1}` frame followed by the transport close.
    pub fn expect_closed(&mut self, reason: &str) {
        let frame = self.next_json();
        assert_eq!(frame["op"], -1, "unexpected frame {}", frame);
        assert_eq!(frame["d"]["reason"], reason);
        assert_eq!(
            self.next(),
            Some(Outbound::Close {
                code: CLOSE_CODE_INTERNAL,
                reason: reason.to_string()
            })
        );
    }

    pub fn is_drained(&self) -> bool {
        self.rx.is_empty()
    }

    /// Simulates the transport reporting the socket gone.
    pub fn disconnect(self) {
        self.router.on_close(self.id);
    }
}

pub fn track(name: &str) -> Track {
    Track {
        name: name.to_string(),
        url: format!("https://www.last.fm/music/Artist/_/{}", name.replace(' ', "+")),
        ..Default::default()
    }
}
