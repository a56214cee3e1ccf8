//! Byte sources for result and annotation files.
//!
//! A locator is a relative key such as `dsEER_Differential/NK cell.txt`.
//! Both backends resolve it against their root and hand back UTF-8 text;
//! callers only ever see the error code.

use crate::error::{EngineError, ErrorCode};
use flate2::read::GzDecoder;
use reqwest::{StatusCode, Url, blocking::Client};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub trait RecordStore: Send + Sync {
    fn load(&self, locator: &str) -> Result<String, EngineError>;

    fn describe(&self) -> String;
}

fn validate_locator(locator: &str) -> Result<(), EngineError> {
    if locator.trim().is_empty() {
        return Err(EngineError::invalid_input("Empty record locator"));
    }
    let path = Path::new(locator);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || locator.starts_with('/') {
        return Err(EngineError::invalid_input(format!(
            "Record locator '{locator}' must be a relative key without '..'"
        )));
    }
    Ok(())
}

fn decode_text(bytes: Vec<u8>, locator: &str) -> Result<String, EngineError> {
    let bytes = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::with_capacity(bytes.len() * 4);
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| EngineError::io(format!("Could not decompress '{locator}': {e}")))?;
        out
    } else {
        bytes
    };
    String::from_utf8(bytes)
        .map_err(|e| EngineError::io(format!("Record '{locator}' is not valid UTF-8: {e}")))
}

/// Files below a local directory, e.g. the `public/DEres` folder of a
/// release checkout.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RecordStore for LocalStore {
    fn load(&self, locator: &str) -> Result<String, EngineError> {
        validate_locator(locator)?;
        let path = self.root.join(locator);
        let bytes = fs::read(&path).map_err(|e| {
            let code = match e.kind() {
                ErrorKind::NotFound => ErrorCode::NotFound,
                _ => ErrorCode::Io,
            };
            EngineError::new(
                code,
                format!("Could not read record file '{}': {e}", path.display()),
            )
        })?;
        decode_text(bytes, locator)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

/// Objects under an HTTP(S) prefix, e.g. the public endpoint of a bucket.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: Url,
    client: Client,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, EngineError> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| {
            EngineError::invalid_input(format!("Invalid object store URL '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(EngineError::invalid_input(format!(
                "Object store URL '{base_url}' must be an http(s) prefix"
            )));
        }
        Ok(Self {
            base_url,
            client: Client::new(),
        })
    }

    /// Percent-encodes each locator segment; cell type names contain spaces
    /// and `+`.
    pub fn object_url(&self, locator: &str) -> Result<Url, EngineError> {
        validate_locator(locator)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                EngineError::invalid_input(format!(
                    "Object store URL '{}' cannot take path segments",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(locator.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

impl RecordStore for HttpStore {
    fn load(&self, locator: &str) -> Result<String, EngineError> {
        let url = self.object_url(locator)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| EngineError::io(format!("Could not fetch '{url}': {e}")))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::not_found(format!(
                "Object '{locator}' does not exist at '{url}'"
            )));
        }
        if !status.is_success() {
            return Err(EngineError::io(format!(
                "Could not fetch '{url}': HTTP {status}"
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| EngineError::io(format!("Could not read response '{url}': {e}")))?;
        decode_text(bytes.to_vec(), locator)
    }

    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }
}

/// Wraps a store and counts `load` calls per locator.
pub struct CountingStore<S> {
    inner: S,
    loads: Mutex<HashMap<String, usize>>,
}

impl<S: RecordStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            loads: Mutex::new(HashMap::new()),
        }
    }

    pub fn loads(&self, locator: &str) -> usize {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl<S: RecordStore> RecordStore for CountingStore<S> {
    fn load(&self, locator: &str) -> Result<String, EngineError> {
        *self
            .loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(locator.to_string())
            .or_default() += 1;
        self.inner.load(locator)
    }

    fn describe(&self) -> String {
        format!("counting:{}", self.inner.describe())
    }
}

impl<S> fmt::Debug for CountingStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::tempdir;

    /// Answers exactly one HTTP request with the given status line and body.
    fn serve_once(status_line: &'static str, body: &'static [u8]) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).expect("header line");
                if n == 0 || line == "\r\n" {
                    break;
                }
            }
            let head = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).expect("write head");
            stream.write_all(body).expect("write body");
            stream.flush().expect("flush");
            request_line
        });
        (format!("http://{addr}/release/"), handle)
    }

    #[test]
    fn local_store_reads_and_classifies_missing_files() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join("dsEER_Differential")).unwrap();
        fs::write(
            td.path().join("dsEER_Differential/NK cell.txt"),
            "id\tlog2FC\n",
        )
        .unwrap();
        let store = LocalStore::new(td.path());

        let text = store.load("dsEER_Differential/NK cell.txt").unwrap();
        assert_eq!(text, "id\tlog2FC\n");

        let err = store.load("dsEER_Differential/Platelet.txt").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn local_store_reports_directory_reads_as_io() {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join("mRNA_Differential/EV.txt")).unwrap();
        let err = LocalStore::new(td.path())
            .load("mRNA_Differential/EV.txt")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }

    #[test]
    fn local_store_decompresses_gzip_content() {
        let td = tempdir().unwrap();
        let file = fs::File::create(td.path().join("anno.txt")).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"V4\tSYMBOL\nds1\tWASF2\n").unwrap();
        encoder.finish().unwrap();

        let text = LocalStore::new(td.path()).load("anno.txt").unwrap();
        assert_eq!(text, "V4\tSYMBOL\nds1\tWASF2\n");
    }

    #[test]
    fn invalid_utf8_is_an_io_failure() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("bad.txt"), [0xff, 0xfe, 0x00]).unwrap();
        let err = LocalStore::new(td.path()).load("bad.txt").unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }

    #[test]
    fn locators_cannot_escape_the_root() {
        let store = LocalStore::new("test_files");
        for locator in ["../Cargo.toml", "/etc/passwd", "a/../../b", ""] {
            let err = store.load(locator).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidInput, "locator {locator:?}");
        }
    }

    #[test]
    fn http_store_encodes_locator_segments() {
        let store = HttpStore::new("https://data.example.org/release/").unwrap();
        let url = store
            .object_url("dsEER_Differential/LDG_CD14+ cell.txt")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://data.example.org/release/dsEER_Differential/LDG_CD14+%20cell.txt"
        );
    }

    #[test]
    fn http_store_rejects_non_http_urls() {
        assert!(HttpStore::new("ftp://example.org/x").is_err());
        assert!(HttpStore::new("not a url").is_err());
    }

    #[test]
    fn http_store_fetches_objects() {
        let (base, server) = serve_once("200 OK", b"V4\tSYMBOL\n");
        let store = HttpStore::new(&base).unwrap();
        let text = store.load("dsRNA_anno.txt").unwrap();
        assert_eq!(text, "V4\tSYMBOL\n");
        let request_line = server.join().unwrap();
        assert!(
            request_line.starts_with("GET /release/dsRNA_anno.txt "),
            "unexpected request: {request_line}"
        );
    }

    #[test]
    fn http_store_maps_404_to_not_found_and_5xx_to_io() {
        let (base, server) = serve_once("404 Not Found", b"");
        let err = HttpStore::new(&base).unwrap().load("missing.txt").unwrap_err();
        server.join().unwrap();
        assert_eq!(err.code, ErrorCode::NotFound);

        let (base, server) = serve_once("503 Service Unavailable", b"busy");
        let err = HttpStore::new(&base).unwrap().load("busy.txt").unwrap_err();
        server.join().unwrap();
        assert_eq!(err.code, ErrorCode::Io);
    }

    #[test]
    fn http_store_transport_errors_are_io() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let store = HttpStore::new(&format!("http://{addr}/")).unwrap();
        let err = store.load("x.txt").unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }

    #[test]
    fn counting_store_counts_per_locator() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("a.txt"), "x").unwrap();
        let store = CountingStore::new(LocalStore::new(td.path()));
        store.load("a.txt").unwrap();
        store.load("a.txt").unwrap();
        let _ = store.load("b.txt");
        assert_eq!(store.loads("a.txt"), 2);
        assert_eq!(store.loads("b.txt"), 1);
        assert_eq!(store.total_loads(), 3);
    }
}
