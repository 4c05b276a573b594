//! WebSocket mock of the realtime voice service
//!
//! Each accepted connection plays the same script of [`Step`]s while a reader
//! task records everything the relay sends.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// One action of the mock's per-connection script
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a text frame
    Text(String),
    /// Send a binary audio frame
    Binary(Vec<u8>),
    /// Pause
    Sleep(Duration),
    /// Wait until at least this many audio bytes have been received in total
    WaitForAudio(usize),
    /// Send a close frame with the given reason
    Close(String),
}

/// What the mock observed
#[derive(Default)]
pub struct MockVoiceState {
    pub received_audio: Mutex<Vec<u8>>,
    pub received_text: Mutex<Vec<String>>,
    pub connections: AtomicUsize,
    pub client_closed: AtomicBool,
    audio_arrived: Notify,
}

pub struct MockVoiceService {
    addr: SocketAddr,
    pub state: Arc<MockVoiceState>,
    task: JoinHandle<()>,
}

impl MockVoiceService {
    /// Bind on a random loopback port and serve `script` to every connection
    pub async fn start(script: Vec<Step>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock voice service");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockVoiceState::default());

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, script, state).await;
                });
            }
        });

        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/session", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received_audio(&self) -> Vec<u8> {
        self.state.received_audio.lock().clone()
    }

    pub fn client_closed(&self) -> bool {
        self.state.client_closed.load(Ordering::SeqCst)
    }

    /// Poll until `check` holds or `limit` elapses
    pub async fn wait_until(&self, limit: Duration, check: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(self)
    }
}

impl Drop for MockVoiceService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    script: Vec<Step>,
    state: Arc<MockVoiceState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut write, mut read) = ws_stream.split();

    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    reader_state.received_audio.lock().extend_from_slice(&data);
                    reader_state.audio_arrived.notify_waiters();
                }
                Ok(Message::Text(text)) => {
                    reader_state.received_text.lock().push(text.as_str().to_owned());
                }
                Ok(Message::Close(_)) => {
                    reader_state.client_closed.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    for step in script {
        match step {
            Step::Text(text) => write.send(Message::Text(text.into())).await?,
            Step::Binary(data) => write.send(Message::Binary(Bytes::from(data))).await?,
            Step::Sleep(duration) => tokio::time::sleep(duration).await,
            Step::WaitForAudio(bytes) => loop {
                let arrived = state.audio_arrived.notified();
                if state.received_audio.lock().len() >= bytes {
                    break;
                }
                if tokio::time::timeout(Duration::from_secs(5), arrived)
                    .await
                    .is_err()
                {
                    return Err("timed out waiting for audio".into());
                }
            },
            Step::Close(reason) => {
                write
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.into(),
                    })))
                    .await?;
            }
        }
    }

    let _ = reader.await;
    Ok(())
}
