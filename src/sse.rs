//! Client side of the import progress stream (Server-Sent Events).
//!
//! Frames arrive as `data: <json>\n\n`. Comment lines and non-data fields
//! are keepalive noise and are ignored. A dedicated `Opened` signal fires
//! as soon as response headers land, because a stream can open and then
//! stay silent for an arbitrary time before the first event.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::ImportSnapshot;
use crate::settings::Session;

#[derive(Debug)]
pub enum StreamEvent {
    /// Response headers received: the channel is open, data may still lag
    Opened,
    Snapshot(ImportSnapshot),
    /// Transport failure, including a refused or rejected subscription
    Error(String),
    /// Server closed the stream without an explicit terminal snapshot
    Closed,
}

/// Incremental `text/event-stream` frame decoder.
///
/// Fed raw byte chunks in whatever sizes the transport delivers; yields the
/// data payload of each completed event. Multi-line data fields are joined
/// with newlines per the framing rules.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=pos).collect();
            let line = raw.trim_end_matches(|c| c == '\r' || c == '\n');

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // ":" comments and event:/id:/retry: fields carry nothing we use
        }
        events
    }
}

/// Subscribe to the progress stream, forwarding decoded events until the
/// stream ends or the receiver goes away.
pub fn spawn_progress_stream(
    http: reqwest::Client,
    session: Session,
    tx: mpsc::Sender<StreamEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let url = format!("{}/api/bookmarks/import/progress/stream", session.api_url);
        let response = match http
            .get(&url)
            .bearer_auth(&session.token)
            .header("Accept", "text/event-stream")
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("HTTP {}", response.status())))
                    .await;
                return;
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };

        if tx.send(StreamEvent::Opened).await.is_err() {
            return;
        }

        let mut parser = SseFrameParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for payload in parser.feed(&bytes) {
                        match serde_json::from_str::<ImportSnapshot>(&payload) {
                            Ok(snapshot) => {
                                if tx.send(StreamEvent::Snapshot(snapshot)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => debug!("Ignoring undecodable stream payload: {}", e),
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            }
        }

        let _ = tx.send(StreamEvent::Closed).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_decodes() {
        let mut parser = SseFrameParser::new();
        let events = parser.feed(b"data: {\"n\":1}\n\n");
        assert_eq!(events, vec!["{\"n\":1}".to_string()]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut parser = SseFrameParser::new();
        assert!(parser.feed(b"data: {\"n\"").is_empty());
        assert!(parser.feed(b":2}\n").is_empty());
        let events = parser.feed(b"\n");
        assert_eq!(events, vec!["{\"n\":2}".to_string()]);
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut parser = SseFrameParser::new();
        let events = parser.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(events, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn crlf_framing_is_accepted() {
        let mut parser = SseFrameParser::new();
        let events = parser.feed(b"data: {\"n\":3}\r\n\r\n");
        assert_eq!(events, vec!["{\"n\":3}".to_string()]);
    }

    #[test]
    fn comments_and_other_fields_are_ignored() {
        let mut parser = SseFrameParser::new();
        let events = parser.feed(b": heartbeat\nevent: progress\nid: 7\ndata: x\n\n");
        assert_eq!(events, vec!["x".to_string()]);
    }

    #[test]
    fn incomplete_frame_yields_nothing() {
        let mut parser = SseFrameParser::new();
        assert!(parser.feed(b"data: pending\n").is_empty());
    }

    #[test]
    fn multi_line_data_joined_with_newline() {
        let mut parser = SseFrameParser::new();
        let events = parser.feed(b"data: a\ndata: b\n\n");
        assert_eq!(events, vec!["a\nb".to_string()]);
    }
}
