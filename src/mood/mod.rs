//! Mood acquisition: the [`MoodSource`] seam, the HTTP endpoint client, and the
//! windowed sampler that turns polls into a single mood value per cycle.

pub mod monitor;
pub mod sampler;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoodError {
    #[error("Mood source unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can report the listener's current mood in `[0, 1]`.
pub trait MoodSource: Send + Sync {
    fn poll(&self) -> Result<f64, MoodError>;
}

/// The `[mood]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MoodSettings {
    /// Endpoint returning `{"current_mood": <number>}`.
    pub url: String,
    pub poll_interval_ms: u64,
    /// Recorded when a poll fails, and returned for an empty window.
    pub neutral: f64,
    pub window_capacity: usize,
}

impl Default for MoodSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5001/get_mood".to_string(),
            poll_interval_ms: 100,
            neutral: 0.5,
            window_capacity: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MoodResponse {
    current_mood: f64,
}

/// Polls a mood endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMoodSource {
    url: String,
}

impl HttpMoodSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl MoodSource for HttpMoodSource {
    fn poll(&self) -> Result<f64, MoodError> {
        let response: MoodResponse = ureq::get(&self.url)
            .call()
            .map_err(|e| MoodError::Unavailable(format!("{}: {e}", self.url)))?
            .body_mut()
            .read_json()
            .map_err(|e| MoodError::Unavailable(format!("bad payload from {}: {e}", self.url)))?;

        if !response.current_mood.is_finite() {
            return Err(MoodError::Unavailable(format!(
                "non-finite mood {} from {}",
                response.current_mood, self.url
            )));
        }
        Ok(response.current_mood.clamp(0.0, 1.0))
    }
}

/// Always reports the same mood.
#[derive(Debug, Clone, Copy)]
pub struct ConstantMoodSource(pub f64);

impl MoodSource for ConstantMoodSource {
    fn poll(&self) -> Result<f64, MoodError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one HTTP response on a local port and return its URL.
    fn serve_once(body: &'static str) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/get_mood", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        (url, handle)
    }

    #[test]
    fn test_http_source_reads_current_mood() {
        let (url, handle) = serve_once(r#"{"current_mood": 0.42}"#);
        let mood = HttpMoodSource::new(url).poll().unwrap();
        assert!((mood - 0.42).abs() < 1e-12);
        handle.join().unwrap();
    }

    #[test]
    fn test_http_source_clamps() {
        let (url, handle) = serve_once(r#"{"current_mood": 3.5}"#);
        assert_eq!(HttpMoodSource::new(url).poll().unwrap(), 1.0);
        handle.join().unwrap();
    }

    #[test]
    fn test_http_source_rejects_bad_payload() {
        let (url, handle) = serve_once(r#"{"mood": 0.1}"#);
        assert!(matches!(
            HttpMoodSource::new(url).poll(),
            Err(MoodError::Unavailable(_))
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint_is_unavailable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let source = HttpMoodSource::new(format!("http://127.0.0.1:{port}/get_mood"));
        assert!(matches!(source.poll(), Err(MoodError::Unavailable(_))));
    }
}
