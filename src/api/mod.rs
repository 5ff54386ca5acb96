//! Read-only HTTP surface for the dashboard.
//!
//! A small blocking HTTP/1.1 server: one accept thread, one short-lived thread
//! per connection, one request per connection. Every response carries
//! `Cache-Control: no-store` and a permissive CORS origin.
//!
//! 404 means "nothing published yet"; 500 means the agent itself failed to
//! answer (poisoned state, unreadable clip).

use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::state::AgentState;

const MAX_HEAD_BYTES: u64 = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5055".to_string(),
        }
    }
}

/// Running server. `stop` waits for the accept thread; open connections
/// finish on their own.
#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.accept_thread.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(anyhow!("http accept thread panicked")),
            _ => Ok(()),
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<AgentState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<AgentState>) -> Self {
        Self { cfg, state }
    }

    /// Bind and start serving. Bind failures are returned to the caller.
    pub fn spawn(self) -> Result<ApiHandle> {
        let listener = TcpListener::bind(self.cfg.addr.as_str())
            .with_context(|| format!("bind http listener on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let shutdown = shutdown.clone();
            let state = self.state;
            std::thread::Builder::new()
                .name("http-accept".to_string())
                .spawn(move || accept_loop(&listener, &state, &shutdown))
                .context("spawn http accept thread")?
        };

        log::info!("http api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }
}

fn accept_loop(listener: &TcpListener, state: &Arc<AgentState>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("http-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = serve(stream, &state) {
                            log::debug!("http connection from {} dropped: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("refusing http connection from {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::error!("http api stopped accepting: {}", err);
                return;
            }
        }
    }
}

/// What a route answers with.
enum Reply {
    Preflight,
    Body {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    Clip(File, u64),
}

impl Reply {
    fn json(status: u16, body: &str) -> Self {
        Reply::Body {
            status,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }
}

fn serve(mut stream: TcpStream, state: &AgentState) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let (method, path) = read_request_line(&stream)?;

    let reply = route(&method, &path, state).unwrap_or_else(|err| {
        log::warn!("http {} {} failed: {:#}", method, path, err);
        Reply::json(500, r#"{"error":"internal_error"}"#)
    });
    send(&mut stream, reply)
}

fn route(method: &str, path: &str, state: &AgentState) -> Result<Reply> {
    match method {
        "OPTIONS" => return Ok(Reply::Preflight),
        "GET" => {}
        _ => return Ok(Reply::json(405, r#"{"error":"method_not_allowed"}"#)),
    }

    let reply = match path {
        "/health" => Reply::json(200, r#"{"ok":true}"#),
        "/latest_frame" => match state.latest_frame()? {
            Some(frame) => Reply::Body {
                status: 200,
                content_type: "image/jpeg",
                body: frame.payload().to_vec(),
            },
            None => Reply::json(404, r#"{"error":"no_frame_yet"}"#),
        },
        "/latest_clip" | "/latest_clip.mp4" => open_clip(state)?,
        "/latest_state" => Reply::Body {
            status: 200,
            content_type: "application/json",
            body: serde_json::to_vec(&state.latest_state()?)?,
        },
        _ => Reply::json(404, r#"{"error":"not_found"}"#),
    };
    Ok(reply)
}

fn open_clip(state: &AgentState) -> Result<Reply> {
    let Some(clip) = state.current_clip()? else {
        return Ok(Reply::json(404, r#"{"error":"no_clip_yet"}"#));
    };
    // A clip can vanish between publish and read; that is still "not ready".
    let file = match File::open(&clip.path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Reply::json(404, r#"{"error":"clip_missing"}"#));
        }
        Err(err) => {
            return Err(err).with_context(|| format!("open clip {}", clip.path.display()))
        }
    };
    let meta = file.metadata()?;
    if !meta.is_file() {
        bail!("clip path {} is not a regular file", clip.path.display());
    }
    Ok(Reply::Clip(file, meta.len()))
}

/// Returns the upper-cased method and the path without its query string.
/// Header lines are consumed and ignored.
fn read_request_line(stream: &TcpStream) -> Result<(String, String)> {
    let mut reader = BufReader::new(std::io::Read::take(stream, MAX_HEAD_BYTES));
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        bail!("connection closed before request line");
    }
    let mut fields = line.split_whitespace();
    let (Some(method), Some(target)) = (fields.next(), fields.next()) else {
        bail!("malformed request line {:?}", line.trim_end());
    };
    let method = method.to_ascii_uppercase();
    let path = target.split_once('?').map_or(target, |(path, _)| path).to_string();

    let mut header = String::new();
    loop {
        header.clear();
        if reader.read_line(&mut header)? == 0 {
            bail!("request head truncated");
        }
        if header.trim_end().is_empty() {
            break;
        }
    }
    Ok((method, path))
}

fn send(stream: &mut TcpStream, reply: Reply) -> Result<()> {
    match reply {
        Reply::Preflight => {
            let extra = "Access-Control-Allow-Methods: GET, OPTIONS\r\n\
                         Access-Control-Allow-Headers: *\r\n";
            stream.write_all(head(204, None, None, extra).as_bytes())?;
        }
        Reply::Body {
            status,
            content_type,
            body,
        } => {
            let len = body.len() as u64;
            stream.write_all(head(status, Some(content_type), Some(len), "").as_bytes())?;
            stream.write_all(&body)?;
        }
        Reply::Clip(mut file, len) => {
            stream.write_all(head(200, Some("video/mp4"), Some(len), "").as_bytes())?;
            std::io::copy(&mut file, stream).context("stream clip")?;
        }
    }
    stream.flush()?;
    Ok(())
}

fn head(status: u16, content_type: Option<&str>, len: Option<u64>, extra: &str) -> String {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    };
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason);
    if let Some(content_type) = content_type {
        out += &format!("Content-Type: {}\r\n", content_type);
    }
    if let Some(len) = len {
        out += &format!("Content-Length: {}\r\n", len);
    }
    out += extra;
    out += "Access-Control-Allow-Origin: *\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n";
    out
}
