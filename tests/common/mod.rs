//! Shared harness: drives the handler layer through in-memory channels.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tandem_signaling::config::Config;
use tandem_signaling::handlers;
use tandem_signaling::protocol::{CallMode, ClientMessage, ServerMessage};
use tandem_signaling::state::AppState;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub state: Arc<AppState>,
}

pub struct TestClient {
    pub user_id: String,
    pub connection_id: String,
    pub closed: CancellationToken,
    pub tx: UnboundedSender<ServerMessage>,
    pub rx: UnboundedReceiver<ServerMessage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    pub async fn connect(&self, user_id: &str) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection =
            handlers::handle_connection(self.state.clone(), user_id, tx.clone()).await;
        let mut client = TestClient {
            user_id: user_id.to_string(),
            connection_id: connection.connection_id,
            closed: connection.closed,
            tx,
            rx,
        };
        assert!(matches!(
            client.rx.try_recv(),
            Ok(ServerMessage::Connected { .. })
        ));
        client
    }

    /// Connects and joins the queue, discarding the initial snapshot.
    pub async fn queued(&self, user_id: &str) -> TestClient {
        let mut client = self.connect(user_id).await;
        self.send(&client, ClientMessage::QueueJoin).await;
        client.drain();
        client
    }

    pub async fn send(&self, client: &TestClient, message: ClientMessage) {
        handlers::dispatch(&self.state, &client.user_id, &client.tx, message).await;
    }

    pub async fn disconnect(&self, client: &TestClient) {
        handlers::handle_disconnect(self.state.clone(), &client.user_id, &client.connection_id)
            .await;
    }

    /// A sends an invite, B accepts. Returns the room id after draining both inboxes.
    pub async fn start_call(
        &self,
        caller: &mut TestClient,
        callee: &mut TestClient,
        caller_seconds: u32,
        callee_seconds: u32,
        mode: CallMode,
    ) -> String {
        self.send(
            caller,
            ClientMessage::Invite {
                to_user_id: callee.user_id.clone(),
                requested_seconds: caller_seconds,
                mode,
            },
        )
        .await;
        let invite_id = callee.invite_id();
        self.send(
            callee,
            ClientMessage::Accept {
                invite_id,
                requested_seconds: callee_seconds,
            },
        )
        .await;

        let room_id = caller.room_id();
        callee.drain();
        room_id
    }

    /// Both sides report media ready so the countdown starts.
    pub async fn media_ready(&self, a: &mut TestClient, b: &mut TestClient, room_id: &str) {
        for client in [&*a, &*b] {
            self.send(
                client,
                ClientMessage::MediaReady {
                    room_id: room_id.to_string(),
                },
            )
            .await;
        }
        a.drain();
        b.drain();
    }
}

impl TestClient {
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Invite id from the pending `call.notify`.
    pub fn invite_id(&mut self) -> String {
        self.drain()
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::Notify { invite_id, .. } => Some(invite_id),
                _ => None,
            })
            .expect("no call.notify received")
    }

    /// Room id from the pending `call.start`.
    pub fn room_id(&mut self) -> String {
        self.drain()
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::Start { room_id, .. } => Some(room_id),
                _ => None,
            })
            .expect("no call.start received")
    }
}

/// Moves virtual time forward and lets timer callbacks run.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
