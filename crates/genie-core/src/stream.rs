use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::client::ChatTransport;
use crate::error::ChatError;
use crate::sse::LineDecoder;

/// Send `text` and read the streamed reply to the end.
///
/// Every fragment is appended to the returned text and also handed to
/// `on_fragment` as it arrives. The wait for the response and for each
/// subsequent chunk is bounded by `idle_timeout`; `cancel` aborts the read
/// at any suspension point.
pub async fn assemble_reply<T, F>(
    transport: &T,
    text: &str,
    idle_timeout: Duration,
    cancel: &CancellationToken,
    mut on_fragment: F,
) -> Result<String, ChatError>
where
    T: ChatTransport + ?Sized,
    F: FnMut(&str),
{
    let mut chunks = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        opened = timeout(idle_timeout, transport.open_stream(text)) => {
            opened.map_err(|_| ChatError::Timeout(idle_timeout))??
        }
    };

    let mut decoder = LineDecoder::new();
    let mut reply = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            next = timeout(idle_timeout, chunks.next()) => {
                next.map_err(|_| ChatError::Timeout(idle_timeout))?
            }
        };

        let Some(chunk) = next else { break };
        for fragment in decoder.push(&chunk?) {
            reply.push_str(&fragment);
            on_fragment(&fragment);
        }
    }

    if let Some(fragment) = decoder.finish() {
        reply.push_str(&fragment);
        on_fragment(&fragment);
    }

    tracing::debug!(chars = reply.chars().count(), "reply stream finished");
    Ok(reply)
}
