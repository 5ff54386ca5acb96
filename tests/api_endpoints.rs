use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::SystemTime;

use camera_agent::api::{ApiConfig, ApiHandle, ApiServer};
use camera_agent::{AgentState, ClipArtifact, Frame, FrameBuffer};

fn jpeg(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    out.extend_from_slice(body);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

struct Response {
    head: String,
    body: Vec<u8>,
}

impl Response {
    fn status(&self) -> u16 {
        self.head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

fn read_response(stream: &mut TcpStream) -> Result<Response> {
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(raw.len());
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw.get(split + 4..).unwrap_or(&[]).to_vec();
    Ok(Response { head, body })
}

struct TestApi {
    dir: tempfile::TempDir,
    state: Arc<AgentState>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let state = Arc::new(AgentState::new("CAM_12", FrameBuffer::with_capacity(3)));
        let api_handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            state.clone(),
        )
        .spawn()?;
        Ok(Self {
            dir,
            state,
            api_handle: Some(api_handle),
        })
    }

    fn request(&self, method: &str, path: &str) -> Result<Response> {
        let addr = self
            .api_handle
            .as_ref()
            .map(|handle| handle.addr)
            .expect("api running");
        let mut stream = TcpStream::connect(addr)?;
        write!(
            stream,
            "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            method, path
        )?;
        read_response(&mut stream)
    }

    fn get(&self, path: &str) -> Result<Response> {
        self.request("GET", path)
    }

    fn publish_clip(&self, bytes: Option<&[u8]>) -> Result<()> {
        let path = self.dir.path().join(".latest_clip_CAM_12.mp4");
        if let Some(bytes) = bytes {
            std::fs::write(&path, bytes)?;
        }
        self.state.publish_clip(ClipArtifact {
            path,
            created_at: SystemTime::now(),
            frame_count: 3,
        })
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

#[test]
fn health_is_always_ok() -> Result<()> {
    let api = TestApi::new()?;
    let response = api.get("/health")?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.json(), serde_json::json!({ "ok": true }));
    assert_eq!(response.header("Cache-Control").as_deref(), Some("no-store"));
    assert_eq!(
        response.header("Access-Control-Allow-Origin").as_deref(),
        Some("*")
    );
    Ok(())
}

#[test]
fn latest_frame_is_404_until_a_frame_arrives() -> Result<()> {
    let api = TestApi::new()?;
    assert_eq!(api.get("/latest_frame")?.status(), 404);

    api.state.append_frame(Frame::new(jpeg(b"one")))?;
    api.state.append_frame(Frame::new(jpeg(b"two")))?;

    let response = api.get("/latest_frame")?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.header("Content-Type").as_deref(), Some("image/jpeg"));
    assert_eq!(response.body, jpeg(b"two"));
    Ok(())
}

#[test]
fn latest_clip_serves_published_file() -> Result<()> {
    let api = TestApi::new()?;
    assert_eq!(api.get("/latest_clip")?.status(), 404);

    api.publish_clip(Some(b"fake mp4 bytes".as_slice()))?;
    for path in ["/latest_clip", "/latest_clip.mp4"] {
        let response = api.get(path)?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Content-Type").as_deref(), Some("video/mp4"));
        assert_eq!(response.header("Content-Length").as_deref(), Some("14"));
        assert_eq!(response.body, b"fake mp4 bytes");
    }
    Ok(())
}

#[test]
fn latest_clip_is_404_when_file_is_missing() -> Result<()> {
    let api = TestApi::new()?;
    api.publish_clip(None)?;
    let response = api.get("/latest_clip.mp4")?;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[test]
fn unreadable_clip_is_a_server_error_not_404() -> Result<()> {
    let api = TestApi::new()?;
    let path = api.dir.path().join("clip_is_a_directory");
    std::fs::create_dir(&path)?;
    api.state.publish_clip(ClipArtifact {
        path,
        created_at: SystemTime::now(),
        frame_count: 3,
    })?;

    let response = api.get("/latest_clip")?;
    assert_eq!(response.status(), 500);
    assert_eq!(response.json()["error"], "internal_error");
    assert_eq!(response.header("Cache-Control").as_deref(), Some("no-store"));

    // The server keeps answering after an internal error.
    assert_eq!(api.get("/health")?.status(), 200);
    Ok(())
}

#[test]
fn latest_state_reports_buffer_and_timestamps() -> Result<()> {
    let api = TestApi::new()?;
    let state = api.get("/latest_state")?.json();
    assert_eq!(state["camera_location"], "CAM_12");
    assert_eq!(state["buffered_frame_count"], 0);
    assert!(state["latest_frame_timestamp"].is_null());
    assert!(state["latest_clip_timestamp"].is_null());

    for body in [b"a", b"b", b"c", b"d"] {
        api.state.append_frame(Frame::new(jpeg(body)))?;
    }
    api.publish_clip(Some(b"clip".as_slice()))?;

    let state = api.get("/latest_state")?.json();
    assert_eq!(state["buffered_frame_count"], 3);
    assert!(state["latest_frame_timestamp"].as_u64().unwrap() > 0);
    assert!(state["latest_clip_timestamp"].as_u64().unwrap() > 0);
    Ok(())
}

#[test]
fn unknown_paths_and_methods() -> Result<()> {
    let api = TestApi::new()?;
    assert_eq!(api.get("/events")?.status(), 404);
    assert_eq!(api.request("POST", "/health")?.status(), 405);

    let preflight = api.request("OPTIONS", "/latest_frame")?;
    assert_eq!(preflight.status(), 204);
    assert_eq!(
        preflight.header("Access-Control-Allow-Origin").as_deref(),
        Some("*")
    );
    Ok(())
}

#[test]
fn query_strings_are_ignored_for_routing() -> Result<()> {
    let api = TestApi::new()?;
    assert_eq!(api.get("/health?t=123")?.status(), 200);
    Ok(())
}
