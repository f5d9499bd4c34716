//! Loading document bytes from a path or an HTTP(S) URL.

use crate::RenderError;
use std::io::Read;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BYTES: u64 = 256 * 1024 * 1024;

/// Reads documents from local paths or `http(s)://` URLs.
///
/// All calls block; callers on an async runtime should run them on a
/// blocking thread.
#[derive(Clone)]
pub struct DocumentFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl Default for DocumentFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_BYTES)
    }
}

impl DocumentFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("shelf/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent, max_bytes }
    }

    pub fn is_remote(location: &str) -> bool {
        let lower = location.trim_start().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    pub fn fetch(&self, location: &str) -> Result<Vec<u8>, RenderError> {
        if Self::is_remote(location) {
            self.fetch_remote(location)
        } else {
            std::fs::read(location)
                .map_err(|source| RenderError::Fetch { location: location.to_owned(), source })
        }
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, RenderError> {
        let http = |message: String| RenderError::Http { location: url.to_owned(), message };

        let resp = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, resp) => http(format!("HTTP {code} {}", resp.status_text())),
            ureq::Error::Transport(transport) => http(transport.to_string()),
        })?;

        let mut bytes = Vec::new();
        resp.into_reader()
            .take(self.max_bytes + 1)
            .read_to_end(&mut bytes)
            .map_err(|source| RenderError::Fetch { location: url.to_owned(), source })?;

        if bytes.len() as u64 > self.max_bytes {
            return Err(http(format!("response exceeds {} bytes", self.max_bytes)));
        }

        tracing::debug!(url, bytes = bytes.len(), "fetched remote document");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    /// Serves a single canned HTTP response on a loopback port.
    fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let header = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        });

        format!("http://{addr}/doc.pdf")
    }

    #[test]
    fn remote_detection() {
        assert!(DocumentFetcher::is_remote("https://example.com/a.pdf"));
        assert!(DocumentFetcher::is_remote("HTTP://example.com/a.pdf"));
        assert!(!DocumentFetcher::is_remote("/tmp/a.pdf"));
        assert!(!DocumentFetcher::is_remote("docs/http.pdf"));
    }

    #[test]
    fn reads_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.5").unwrap();

        let bytes = DocumentFetcher::default().fetch(file.path().to_str().unwrap()).unwrap();
        assert_eq!(bytes, b"%PDF-1.5");
    }

    #[test]
    fn missing_file_is_fetch_error() {
        let err = DocumentFetcher::default().fetch("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, RenderError::Fetch { .. }));
    }

    #[test]
    fn downloads_remote_body() {
        let url = serve_once("200 OK", b"%PDF-remote");
        let bytes = DocumentFetcher::default().fetch(&url).unwrap();
        assert_eq!(bytes, b"%PDF-remote");
    }

    #[test]
    fn not_found_is_http_error() {
        let url = serve_once("404 Not Found", b"");
        let err = DocumentFetcher::default().fetch(&url).unwrap_err();
        match err {
            RenderError::Http { message, .. } => assert!(message.contains("404"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oversized_body_is_rejected() {
        let url = serve_once("200 OK", b"0123456789");
        let fetcher = DocumentFetcher::new(Duration::from_secs(5), 4);
        assert!(matches!(fetcher.fetch(&url), Err(RenderError::Http { .. })));
    }
}
