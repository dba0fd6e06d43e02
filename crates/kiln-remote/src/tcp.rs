//! Length-prefixed JSON transport to the script-execution host.
//!
//! Every frame is a little-endian `u32` byte length followed by one JSON
//! document:
//!
//! ```text
//! -> {"id": 7, "method": "getStackTrace", "params": {...}}
//! <- {"id": 7, "result": {...}}            (or {"id": 7, "error": {"message": "..."}})
//! <- {"event": "stopped", "params": {...}} (unsolicited)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{RemoteConnection, RemoteError, RemoteEvent, RemoteMethod};

#[derive(Debug, Clone)]
pub struct TcpRemoteConfig {
    pub connect_timeout: Duration,
    /// `None` waits for a reply indefinitely.
    pub request_timeout: Option<Duration>,
    pub max_frame_bytes: u32,
    pub event_channel_size: usize,
}

impl Default for TcpRemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(30)),
            max_frame_bytes: 16 * 1024 * 1024,
            event_channel_size: 256,
        }
    }
}

type PendingReply = oneshot::Sender<Result<Value, RemoteError>>;

struct Inner {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: parking_lot::Mutex<HashMap<u64, PendingReply>>,
    next_id: AtomicU64,
    events: broadcast::Sender<RemoteEvent>,
    shutdown: CancellationToken,
    config: TcpRemoteConfig,
}

#[derive(Clone)]
pub struct TcpRemote {
    inner: Arc<Inner>,
}

impl TcpRemote {
    pub async fn connect(addr: &str, config: TcpRemoteConfig) -> Result<Self, RemoteError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RemoteError::Transport {
                message: format!("timed out connecting to {addr}"),
            })??;
        let _ = stream.set_nodelay(true);
        tracing::info!(target: "kiln.remote", addr, "connected to script host");
        Ok(Self::from_stream(stream, config))
    }

    /// Wrap an already-established bidirectional stream.
    pub fn from_stream<S>(stream: S, config: TcpRemoteConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));

        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::new(writer)),
            pending: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));

        Self { inner }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    fn remove_pending(&self, id: u64) {
        self.inner.pending.lock().remove(&id);
    }
}

#[async_trait]
impl RemoteConnection for TcpRemote {
    async fn send_request(
        &self,
        method: RemoteMethod,
        params: Value,
    ) -> Result<Value, RemoteError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(RemoteError::NotConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let frame = json!({ "id": id, "method": method.as_str(), "params": params });
        let bytes = match serde_json::to_vec(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.remove_pending(id);
                return Err(RemoteError::Transport {
                    message: format!("encode {method} request: {err}"),
                });
            }
        };

        let written = {
            let mut writer = self.inner.writer.lock().await;
            write_frame(&mut *writer, self.inner.config.max_frame_bytes, &bytes).await
        };
        if let Err(err) = written {
            self.remove_pending(id);
            return Err(err);
        }
        tracing::trace!(target: "kiln.remote", id, %method, "sent remote request");

        let shutdown = self.inner.shutdown.clone();
        let reply = async move {
            tokio::select! {
                _ = shutdown.cancelled() => Err(RemoteError::ConnectionClosed),
                res = rx => res.unwrap_or(Err(RemoteError::ConnectionClosed)),
            }
        };

        let result = match self.inner.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply).await {
                Ok(result) => result,
                Err(_elapsed) => Err(RemoteError::Timeout { method }),
            },
            None => reply.await,
        };
        if result.is_err() {
            self.remove_pending(id);
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.inner.events.subscribe()
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, inner: Arc<Inner>) {
    loop {
        let frame = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = read_frame(&mut reader, inner.config.max_frame_bytes) => res,
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::info!(target: "kiln.remote", "script host closed the connection");
                break;
            }
            Err(err) => {
                tracing::warn!(target: "kiln.remote", error = %err, "remote read failed");
                break;
            }
        };

        if let Err(err) = dispatch_frame(&inner, &bytes) {
            tracing::warn!(target: "kiln.remote", error = %err, "dropping remote frame");
        }
    }

    inner.shutdown.cancel();

    let pending = std::mem::take(&mut *inner.pending.lock());
    for (_id, tx) in pending {
        let _ = tx.send(Err(RemoteError::ConnectionClosed));
    }
}

fn dispatch_frame(inner: &Inner, bytes: &[u8]) -> Result<(), RemoteError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| RemoteError::Decode {
        message: err.to_string(),
    })?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let reply = match value.get("error") {
            Some(error) if !error.is_null() => Err(RemoteError::rejected(error_message(error))),
            _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        let tx = inner.pending.lock().remove(&id);
        match tx {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            // Late replies for timed-out requests land here.
            None => tracing::debug!(target: "kiln.remote", id, "reply for unknown request"),
        }
        return Ok(());
    }

    if value.get("event").is_some() {
        let event: RemoteEvent =
            serde_json::from_value(value).map_err(|err| RemoteError::Decode {
                message: err.to_string(),
            })?;
        // No subscribers is not an error.
        let _ = inner.events.send(event);
        return Ok(());
    }

    Err(RemoteError::Decode {
        message: "frame is neither a reply nor an event".to_owned(),
    })
}

fn error_message(error: &Value) -> String {
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return message.to_owned();
    }
    match error.as_str() {
        Some(message) => message.to_owned(),
        None => error.to_string(),
    }
}

pub(crate) async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    max_frame_bytes: u32,
    payload: &[u8],
) -> Result<(), RemoteError> {
    let len: u32 = payload
        .len()
        .try_into()
        .ok()
        .filter(|len| *len <= max_frame_bytes)
        .ok_or_else(|| RemoteError::Transport {
            message: format!(
                "frame too large: {} > {max_frame_bytes}",
                payload.len()
            ),
        })?;

    writer.write_u32_le(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub(crate) async fn read_frame<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Option<Vec<u8>>, RemoteError> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len > max_frame_bytes {
        return Err(RemoteError::Transport {
            message: format!("frame too large: {len} > {max_frame_bytes}"),
        });
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
