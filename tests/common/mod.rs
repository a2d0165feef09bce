//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a temporary directory holding a
//! file-backed SQLite database and a media root, plus a fully wired
//! [`Postprocessor`]. Also provides raw TCP servers for responses that
//! `wiremock` cannot produce, such as an endless chunked body.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use agora::config::{CacheConfig, Config};
use agora::postprocess::{Dispatch, Postprocessor};
use agora_core::{RecordId, RecordKind};
use agora_db::models::{CachedImage, TextRecord};
use agora_db::pool::{init_pool, DbPool};
use agora_db::queries::{cached_images, text_records};
use async_trait::async_trait;
use tempfile::{SpooledTempFile, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Test harness wrapping a temp directory, database pool and postprocessor.
pub struct TestHarness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub config: Config,
    pub postprocessor: Arc<Postprocessor>,
}

impl TestHarness {
    /// Create a new harness with default cache limits.
    pub fn new() -> Self {
        Self::with_cache(CacheConfig::default())
    }

    /// Create a new harness with custom cache limits.
    pub fn with_cache(cache: CacheConfig) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("agora.db");
        let pool = init_pool(db_path.to_str().expect("temp path is UTF-8"))
            .expect("failed to create pool");

        let mut config = Config::default();
        config.storage.db_path = db_path;
        config.storage.media_dir = dir.path().join("media");
        config.cache = cache;

        let postprocessor = Arc::new(
            Postprocessor::from_config(&config, pool.clone()).expect("failed to build postprocessor"),
        );

        Self {
            dir,
            pool,
            config,
            postprocessor,
        }
    }

    pub fn insert(&self, kind: RecordKind, raw: &str) -> TextRecord {
        let conn = self.pool.get().unwrap();
        text_records::insert_record(&conn, kind, raw, "initial").unwrap()
    }

    pub fn record(&self, kind: RecordKind, id: RecordId) -> TextRecord {
        let conn = self.pool.get().unwrap();
        text_records::get_record(&conn, kind, id).unwrap().unwrap()
    }

    pub fn set_rendered(&self, kind: RecordKind, id: RecordId, rendered: &str) {
        let conn = self.pool.get().unwrap();
        assert!(text_records::update_rendered(&conn, kind, id, rendered).unwrap());
    }

    pub fn cached(&self, url: &str) -> Option<CachedImage> {
        let conn = self.pool.get().unwrap();
        cached_images::get_by_source_url(&conn, url).unwrap()
    }

    pub fn cached_count(&self) -> i64 {
        let conn = self.pool.get().unwrap();
        cached_images::count_cached_images(&conn).unwrap()
    }

    pub fn media_dir(&self) -> std::path::PathBuf {
        self.config.storage.media_dir.clone()
    }
}

/// Encode a solid-color PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    png_bytes_colored(width, height, [200, 30, 30])
}

pub fn png_bytes_colored(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub fn spool(bytes: &[u8]) -> SpooledTempFile {
    let mut spool = SpooledTempFile::new(64 * 1024);
    spool.write_all(bytes).unwrap();
    spool
}

/// Dispatcher that records every call instead of running anything.
#[derive(Default)]
pub struct RecordingDispatch {
    pub calls: Mutex<Vec<(RecordKind, RecordId)>>,
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(&self, kind: RecordKind, id: RecordId) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((kind, id));
        Ok(())
    }
}

async fn read_request_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return;
        }
    }
}

/// Serve the same raw HTTP response bytes to every connection.
pub async fn serve_raw(response: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                read_request_head(&mut socket).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Serve a PNG-typed chunked body with no `Content-Length` that keeps going
/// until the client hangs up (or 64 MiB, whichever comes first).
pub async fn serve_endless_chunked() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_request_head(&mut socket).await;
                let head = "HTTP/1.1 200 OK\r\n\
                            Content-Type: image/png\r\n\
                            Transfer-Encoding: chunked\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }

                let mut chunk = b"1000\r\n".to_vec();
                chunk.extend(std::iter::repeat(0xAB).take(0x1000));
                chunk.extend_from_slice(b"\r\n");

                for _ in 0..(64 * 1024 * 1024 / 0x1000) {
                    if socket.write_all(&chunk).await.is_err() {
                        return;
                    }
                }
                let _ = socket.write_all(b"0\r\n\r\n").await;
            });
        }
    });

    addr
}
