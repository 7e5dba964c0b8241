//! Plain HTTP health check served on the signaling port.
//!
//! A `GET` request without an `Upgrade: websocket` header is answered with
//! `200 OK` and a short text body, then the connection is closed. Anything
//! else is left untouched for the WebSocket handshake.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Body of the health response.
pub const HEALTH_BODY: &str = "Signaling server is running";

/// Largest request head inspected before deferring to the handshake.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Pause between peeks while the request head is still arriving.
const PEEK_RETRY: Duration = Duration::from_millis(5);

/// Answers the request if it is a plain HTTP `GET`.
///
/// Returns true if a health response was written and the connection must
/// not be upgraded. Nothing is consumed from the stream otherwise.
pub async fn serve_plain_http(stream: &mut TcpStream) -> io::Result<bool> {
    let Some(head_len) = plain_request_len(stream).await? else {
        return Ok(false);
    };

    // Read the request off the socket so closing does not reset it
    let mut head = vec![0; head_len];
    stream.read_exact(&mut head).await?;

    stream.write_all(health_response().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(true)
}

fn health_response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {HEALTH_BODY}",
        HEALTH_BODY.len()
    )
}

/// Peeks at the request head. Returns its length if it is a plain `GET`.
async fn plain_request_len(stream: &TcpStream) -> io::Result<Option<usize>> {
    let mut buf = vec![0; MAX_REQUEST_HEAD];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(end) = head_end(&buf[..n]) {
            return Ok(is_plain_get(&buf[..end]).then_some(end));
        }
        if n == buf.len() {
            return Ok(None);
        }
        tokio::time::sleep(PEEK_RETRY).await;
    }
}

/// Length of the request head including the blank line, once complete.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn is_plain_get(head: &[u8]) -> bool {
    let Ok(head) = std::str::from_utf8(head) else {
        return false;
    };
    let mut lines = head.split("\r\n");
    let is_get = lines
        .next()
        .is_some_and(|request_line| request_line.starts_with("GET "));

    is_get
        && !lines.any(|line| {
            line.split_once(':').is_some_and(|(name, value)| {
                name.trim().eq_ignore_ascii_case("upgrade")
                    && value.trim().eq_ignore_ascii_case("websocket")
            })
        })
}
