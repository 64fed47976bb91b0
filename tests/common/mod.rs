//! Shared fixtures: a tiny HTTP/1.1 server and scripted resolvers

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tubeloader::extractor::{
    CaptionTrack, MetadataResolver, PlaylistEntry, PlaylistListing, StreamCatalog,
    StreamDescriptor, ThumbnailVariant,
};
use tubeloader::utils::error::{ErrorKind, Result, TubeloaderError};

/// How the server answers one request on a path
#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub accept_ranges: bool,
    /// Close the connection after this many body bytes, Content-Length unchanged
    pub cut_at: Option<usize>,
    /// Total claimed in Content-Range, when it should disagree with the body
    pub advertised_total: Option<usize>,
    /// Byte actually served on a range request, whatever was asked for
    pub resume_at: Option<usize>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            accept_ranges: true,
            cut_at: None,
            advertised_total: None,
            resume_at: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            accept_ranges: false,
            cut_at: None,
            advertised_total: None,
            resume_at: None,
        }
    }

    pub fn cut(body: impl Into<Vec<u8>>, cut_at: usize) -> Self {
        Self {
            cut_at: Some(cut_at),
            ..Self::ok(body)
        }
    }

    pub fn without_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    pub fn advertising_total(mut self, total: usize) -> Self {
        self.advertised_total = Some(total);
        self
    }

    pub fn resuming_at(mut self, start: usize) -> Self {
        self.resume_at = Some(start);
        self
    }
}

/// A request as the server saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub path: String,
    pub range: Option<String>,
}

#[derive(Default)]
struct State {
    /// Routes are used in order; the last one keeps answering
    routes: HashMap<String, VecDeque<Route>>,
    seen: Vec<Seen>,
}

pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve(socket, state).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Queue `routes` for `path`, answered one per request
    pub fn route(&self, path: &str, routes: Vec<Route>) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), routes.into());
    }

    pub fn seen(&self, path: &str) -> Vec<Seen> {
        self.state
            .lock()
            .unwrap()
            .seen
            .iter()
            .filter(|s| s.path == path)
            .cloned()
            .collect()
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<State>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.lines();
    let path = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let range = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());

    let route = {
        let mut state = state.lock().unwrap();
        state.seen.push(Seen {
            path: path.clone(),
            range: range.clone(),
        });
        match state.routes.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };
    let route = route.unwrap_or_else(|| Route::status(404));

    if route.status != 200 {
        let response = format!(
            "HTTP/1.1 {} Fixture\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            route.status
        );
        socket.write_all(response.as_bytes()).await?;
        return socket.shutdown().await;
    }

    let len = route.body.len();
    let start = range
        .as_deref()
        .filter(|_| route.accept_ranges)
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());

    let (head, body) = match start {
        Some(start) if start >= len => {
            let head = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                len
            );
            (head, &route.body[..0])
        }
        Some(start) => {
            let start = route.resume_at.unwrap_or(start).min(len - 1);
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                start,
                len - 1,
                route.advertised_total.unwrap_or(len),
                len - start
            );
            (head, &route.body[start..])
        }
        None => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                len
            );
            (head, &route.body[..])
        }
    };

    socket.write_all(head.as_bytes()).await?;
    match route.cut_at {
        Some(cut) => {
            socket.write_all(&body[..cut.min(body.len())]).await?;
            socket.flush().await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None => socket.write_all(body).await?,
    }
    socket.shutdown().await
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn stream(format_id: &str, url: String, has_video: bool, has_audio: bool, height: Option<u32>) -> StreamDescriptor {
    StreamDescriptor {
        format_id: format_id.to_string(),
        container: if has_video { "mp4" } else { "webm" }.to_string(),
        mime_type: None,
        video_codec: has_video.then(|| "avc1.64001F".to_string()),
        audio_codec: has_audio.then(|| "opus".to_string()),
        width: height.map(|h| h * 16 / 9),
        height,
        fps: has_video.then_some(30),
        audio_bitrate_kbps: has_audio.then_some(128),
        bitrate_kbps: None,
        approx_size_bytes: None,
        quality_label: height.map(|h| format!("{}p", h)),
        has_video,
        has_audio,
        source_url: url,
    }
}

pub fn catalog(id: &str, title: &str, streams: Vec<StreamDescriptor>) -> StreamCatalog {
    StreamCatalog {
        id: id.to_string(),
        title: title.to_string(),
        author: Some("Fixture".to_string()),
        description: None,
        duration: Some(Duration::from_secs(60)),
        publish_date: None,
        view_count: Some(1),
        is_live: false,
        thumbnails: Vec::<ThumbnailVariant>::new(),
        caption_tracks: Vec::<CaptionTrack>::new(),
        streams,
        resolver: "scripted".to_string(),
    }
}

fn error_for(kind: ErrorKind, id: &str) -> TubeloaderError {
    match kind {
        ErrorKind::NotFound => TubeloaderError::NotFound(format!("{} does not exist", id)),
        ErrorKind::Unavailable => TubeloaderError::Unavailable(format!("{} is private", id)),
        ErrorKind::RateLimited => TubeloaderError::RateLimited(id.to_string()),
        _ => TubeloaderError::Internal(format!("{} failed: {}", id, kind)),
    }
}

/// Resolver answering from prepared catalogs.
///
/// Several catalogs for one id are handed out in order (the last one
/// repeats), which lets a test serve an expired URL first.
#[derive(Default)]
pub struct ScriptedResolver {
    catalogs: Mutex<HashMap<String, VecDeque<StreamCatalog>>>,
    failures: HashMap<String, ErrorKind>,
    panics: HashSet<String>,
    playlist: Option<PlaylistListing>,
    delay: Duration,
    resolve_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(self, catalog: StreamCatalog) -> Self {
        self.catalogs
            .lock()
            .unwrap()
            .entry(catalog.id.clone())
            .or_default()
            .push_back(catalog);
        self
    }

    pub fn with_failure(mut self, id: &str, kind: ErrorKind) -> Self {
        self.failures.insert(id.to_string(), kind);
        self
    }

    /// Resolving `id` panics, taking the calling task down
    pub fn with_panic(mut self, id: &str) -> Self {
        self.panics.insert(id.to_string());
        self
    }

    pub fn with_playlist(mut self, id: &str, item_ids: &[String]) -> Self {
        self.playlist = Some(PlaylistListing {
            id: id.to_string(),
            title: format!("Playlist {}", id),
            entries: item_ids
                .iter()
                .map(|i| PlaylistEntry {
                    id: i.clone(),
                    title: None,
                })
                .collect(),
        });
        self
    }

    /// Hold each resolve for `delay` so concurrent calls overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataResolver for ScriptedResolver {
    fn id(&self) -> &'static str {
        "scripted"
    }

    async fn resolve(&self, identifier: &str) -> Result<StreamCatalog> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(identifier) {
            panic!("scripted panic while resolving {}", identifier);
        }
        if let Some(kind) = self.failures.get(identifier) {
            return Err(error_for(*kind, identifier));
        }
        let mut catalogs = self.catalogs.lock().unwrap();
        let queue = catalogs
            .get_mut(identifier)
            .ok_or_else(|| TubeloaderError::NotFound(format!("{} is not scripted", identifier)))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.ok_or_else(|| TubeloaderError::NotFound(identifier.to_string()))
    }

    async fn resolve_playlist(&self, identifier: &str) -> Result<PlaylistListing> {
        match &self.playlist {
            Some(listing) if listing.id == identifier => Ok(listing.clone()),
            _ => Err(TubeloaderError::NotFound(format!("playlist {}", identifier))),
        }
    }
}
