//! In-process WebSocket server standing in for the exchange feed

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

enum Command {
    Send(String),
    Close,
}

#[derive(Default)]
struct Inner {
    received: Mutex<Vec<(usize, Value)>>,
    clients: Mutex<Vec<(usize, mpsc::UnboundedSender<Command>)>>,
    accepted: AtomicUsize,
}

pub struct MockFeedServer {
    addr: SocketAddr,
    inner: Arc<Inner>,
    handle: JoinHandle<()>,
}

impl MockFeedServer {
    pub async fn spawn() -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let inner = Arc::new(Inner::default());

        let shared = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = shared.accepted.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_socket(id, shared, stream).await {
                        tracing::debug!(error = %e, "mock feed connection ended with error");
                    }
                });
            }
        });

        Ok(Self {
            addr,
            inner,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    /// `subscription` objects of every `method` frame on one connection
    pub fn requests(&self, connection: usize, method: &str) -> Vec<Value> {
        self.inner
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, frame)| *id == connection && frame["method"] == method)
            .map(|(_, frame)| frame["subscription"].clone())
            .collect()
    }

    /// Heartbeat frames seen on one connection
    pub fn pings(&self, connection: usize) -> usize {
        self.inner
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, frame)| *id == connection && frame["method"] == "ping")
            .count()
    }

    /// Push a text frame to every live connection
    pub fn push(&self, text: &str) {
        for (_, client) in self.inner.clients.lock().unwrap().iter() {
            let _ = client.send(Command::Send(text.to_string()));
        }
    }

    /// Close every live connection from the server side
    pub fn kick(&self) {
        for (_, client) in self.inner.clients.lock().unwrap().drain(..) {
            let _ = client.send(Command::Close);
        }
    }
}

impl Drop for MockFeedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_socket(id: usize, inner: Arc<Inner>, stream: TcpStream) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    inner.clients.lock().unwrap().push((id, tx));

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Send(text)) => sink.send(Message::Text(text)).await?,
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)?;
                    if value["method"] == "ping" {
                        sink.send(Message::Text(r#"{"channel":"pong"}"#.to_string())).await?;
                    }
                    inner.received.lock().unwrap().push((id, value));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }

    inner.clients.lock().unwrap().retain(|(client, _)| *client != id);
    Ok(())
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
