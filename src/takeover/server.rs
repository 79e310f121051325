use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::{Message, WebSocket};

use crate::render::RenderControl;
use crate::serial::{SerialWriter, WriteError};

#[derive(Debug, Clone)]
pub struct TakeoverConfig {
    pub listen: String,
    /// A client at least this old may be evicted by a newcomer.
    pub eviction_age: Duration,
    /// A client silent for this long is disconnected.
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Evicted,
    ServerBusy,
    IdleTimeout,
    SerialError,
    Shutdown,
}

/// JSON error sent to clients as a text frame before closing.
#[derive(Debug, Clone, Serialize)]
pub struct ClientError {
    pub error: String,
    pub code: ErrorCode,
    pub timestamp: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ClientError {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            retry_after: None,
            details: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).expect("serialize client error")
    }
}

/// Admission policy for a new connection given the active client's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Evict the active client, then accept the newcomer.
    Evict,
    Reject { retry_after_secs: u64 },
}

pub fn admission_decision(active_age: Option<Duration>, eviction_age: Duration) -> Admission {
    match active_age {
        None => Admission::Accept,
        Some(age) if age >= eviction_age => Admission::Evict,
        Some(age) => {
            let remaining = eviction_age.saturating_sub(age);
            Admission::Reject {
                retry_after_secs: remaining.as_secs_f64().ceil() as u64,
            }
        }
    }
}

struct ClientHandle {
    connected_at: Instant,
    evict: Arc<AtomicBool>,
}

/// The single active-client slot. Occupied exactly while a client thread is
/// running, so at most one client is ever active.
struct Slot {
    active: Mutex<Option<ClientHandle>>,
    freed: Condvar,
}

/// WebSocket takeover server: a remote client gets exclusive, raw-binary
/// access to the serial link while local rendering is paused.
pub struct TakeoverServer {
    listener: TcpListener,
    cfg: TakeoverConfig,
}

impl TakeoverServer {
    /// Bind the listen socket. A bind failure is fatal at startup.
    pub fn bind(cfg: TakeoverConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&cfg.listen)
            .with_context(|| format!("bind websocket listener on {}", cfg.listen))?;
        listener
            .set_nonblocking(true)
            .context("set websocket listener non-blocking")?;
        info!("Takeover server listening on ws://{}/ws", cfg.listen);
        Ok(Self { listener, cfg })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn spawn(
        self,
        control: RenderControl,
        writer: SerialWriter,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("takeover".into())
            .spawn(move || accept_loop(self.listener, self.cfg, control, writer, stop))
            .expect("spawn takeover thread")
    }
}

fn accept_loop(
    listener: TcpListener,
    cfg: TakeoverConfig,
    control: RenderControl,
    writer: SerialWriter,
    stop: Arc<AtomicBool>,
) {
    let slot = Arc::new(Slot {
        active: Mutex::new(None),
        freed: Condvar::new(),
    });

    while !stop.load(Ordering::SeqCst) {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => {
                warn!("WebSocket accept error: {err}");
                continue;
            }
        };
        if let Err(err) = handle_connection(
            stream,
            peer,
            &cfg,
            &slot,
            &control,
            &writer,
            &stop,
        ) {
            debug!("WebSocket connection from {peer} dropped: {err}");
        }
    }
}

fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: &TakeoverConfig,
    slot: &Arc<Slot>,
    control: &RenderControl,
    writer: &SerialWriter,
    stop: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    stream
        .set_nonblocking(false)
        .context("set client stream blocking")?;
    // Generous timeout for the handshake; tightened afterwards so the
    // client loop can poll its evict/idle/stop conditions.
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("set client read timeout")?;

    let path_check = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == "/ws" {
            Ok(resp)
        } else {
            let resp = tungstenite::http::Response::builder()
                .status(404)
                .body(Some("only /ws is served".to_string()))
                .expect("build error response");
            Err(resp)
        }
    };
    let mut ws = tungstenite::accept_hdr(stream, path_check).context("websocket handshake")?;
    ws.get_ref()
        .set_read_timeout(Some(Duration::from_millis(100)))
        .context("tighten client read timeout")?;

    // Admission under the slot lock; an evicted predecessor is waited out so
    // the slot never holds two clients. The rejection message itself is sent
    // after the lock is released.
    let evict_flag = Arc::new(AtomicBool::new(false));
    let rejection = {
        let mut active = slot.active.lock().expect("lock client slot");
        loop {
            let age = active.as_ref().map(|c| c.connected_at.elapsed());
            match admission_decision(age, cfg.eviction_age) {
                Admission::Accept => {
                    *active = Some(ClientHandle {
                        connected_at: Instant::now(),
                        evict: evict_flag.clone(),
                    });
                    break None;
                }
                Admission::Evict => {
                    info!("Evicting takeover client for newcomer {peer}");
                    active
                        .as_ref()
                        .expect("evict implies active")
                        .evict
                        .store(true, Ordering::SeqCst);
                    let (guard, timeout) = slot
                        .freed
                        .wait_timeout_while(active, Duration::from_secs(5), |a| a.is_some())
                        .expect("wait for client slot");
                    active = guard;
                    if timeout.timed_out() {
                        anyhow::bail!("evicted client did not release the slot");
                    }
                }
                Admission::Reject { retry_after_secs } => {
                    info!("Rejecting takeover client {peer}: busy");
                    break Some(
                        ClientError::new(
                            ErrorCode::ServerBusy,
                            "another client is using the serial link",
                        )
                        .with_retry_after(retry_after_secs),
                    );
                }
            }
        }
    };
    if let Some(msg) = rejection {
        send_error_and_close(&mut ws, &msg);
        return Ok(());
    }

    info!("Takeover client connected from {peer}");
    control.pause();

    let slot = slot.clone();
    let control = control.clone();
    let writer = writer.clone();
    let stop = stop.clone();
    let idle_timeout = cfg.idle_timeout;
    std::thread::Builder::new()
        .name("takeover-client".into())
        .spawn(move || {
            client_loop(&mut ws, evict_flag, idle_timeout, &writer, &stop);
            // Resume strictly before releasing the slot: a successor waiting
            // on the slot must find the engine resumed, so its own pause()
            // is a fresh transition and emits the clear-all.
            control.resume();
            *slot.active.lock().expect("lock client slot") = None;
            slot.freed.notify_all();
            info!("Takeover client {peer} disconnected");
        })
        .context("spawn takeover client thread")?;
    Ok(())
}

/// Forward binary frames to the serial link until the client leaves, idles
/// out, is evicted, or the process shuts down.
fn client_loop(
    ws: &mut WebSocket<TcpStream>,
    evict: Arc<AtomicBool>,
    idle_timeout: Duration,
    writer: &SerialWriter,
    stop: &Arc<AtomicBool>,
) {
    let mut last_activity = Instant::now();
    let close_reason = loop {
        if stop.load(Ordering::SeqCst) {
            break Some(ClientError::new(ErrorCode::Shutdown, "server shutting down"));
        }
        if evict.load(Ordering::SeqCst) {
            break Some(ClientError::new(
                ErrorCode::Evicted,
                "evicted by a newer client",
            ));
        }
        if last_activity.elapsed() >= idle_timeout {
            break Some(ClientError::new(
                ErrorCode::IdleTimeout,
                "no data received before idle timeout",
            ));
        }

        match ws.read() {
            Ok(Message::Binary(data)) => {
                last_activity = Instant::now();
                match writer.send(data) {
                    Ok(()) | Err(WriteError::Backpressure) => {}
                    Err(WriteError::Disconnected) => {
                        break Some(
                            ClientError::new(ErrorCode::SerialError, "serial write failed")
                                .with_details("serial link lost"),
                        );
                    }
                }
            }
            Ok(Message::Text(_)) => {
                warn!("Ignoring text frame from takeover client");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(_)) => break None,
            Err(tungstenite::Error::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                break None;
            }
            Err(err) => {
                debug!("Takeover client read error: {err}");
                break None;
            }
        }
    };

    if let Some(msg) = close_reason {
        send_error_and_close(ws, &msg);
    } else {
        let _ = ws.close(None);
        let _ = ws.flush();
    }
}

fn send_error_and_close(ws: &mut WebSocket<TcpStream>, msg: &ClientError) {
    let _ = ws.send(Message::Text(msg.to_json()));
    let _ = ws.close(None);
    let _ = ws.flush();
}
