use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;

use crate::error::ChatError;

/// Raw body chunks of a streaming reply, in arrival order
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

/// Opens one streaming reply for a user message.
///
/// A non-2xx response is reported as [`ChatError::Status`] before any chunk
/// is read.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, text: &str) -> Result<ChunkStream, ChatError>;
}

#[derive(Serialize)]
struct GraphRequest<'a> {
    input: GraphInput<'a>,
}

#[derive(Serialize)]
struct GraphInput<'a> {
    messages: [&'a str; 1],
}

/// Client for a graph server exposing `POST /graph/stream`
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self) -> String {
        format!("{}/graph/stream", self.base_url)
    }
}

#[async_trait]
impl ChatTransport for GraphClient {
    async fn open_stream(&self, text: &str) -> Result<ChunkStream, ChatError> {
        let url = self.stream_url();
        let request = GraphRequest {
            input: GraphInput { messages: [text] },
        };

        tracing::debug!(%url, "opening reply stream");
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%url, %status, "graph endpoint rejected request");
            return Err(ChatError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accept one connection, answer it with `response`, and hand back the
    /// request that was received
    async fn serve_once(response: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    async fn collect(mut stream: ChunkStream) -> String {
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend(chunk.unwrap());
        }
        String::from_utf8(body).unwrap()
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = GraphClient::new("http://localhost:8000/");
        assert_eq!(client.stream_url(), "http://localhost:8000/graph/stream");
    }

    #[tokio::test]
    async fn test_posts_single_message_body() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
             data: {\"chatbot\":{\"messages\":[{\"content\":\"hey\"}]}}\n",
        )
        .await;

        let client = GraphClient::new(&base_url);
        let stream = client.open_stream("Hello").await.unwrap();
        let body = collect(stream).await;
        assert!(body.contains("\"content\":\"hey\""));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /graph/stream HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"input":{"messages":["Hello"]}}"#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let client = GraphClient::new(&base_url);
        let err = client.open_stream("Hello").await.err().unwrap();
        assert_eq!(err, ChatError::Status(500));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GraphClient::new(&format!("http://{}", addr));
        let err = client.open_stream("Hello").await.err().unwrap();
        assert!(matches!(err, ChatError::Transport(_)));
    }
}
