//! Raw HTTP/1.1 servers for responses wiremock cannot shape.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What a raw server writes after the response head.
#[derive(Debug, Clone)]
pub enum Body {
    /// Nothing beyond the head.
    None,
    /// Chunked body, terminated with the zero-length chunk.
    Chunked(Vec<Vec<u8>>),
    /// Chunked body whose remaining chunks never arrive.
    ChunkedThenStall(Vec<Vec<u8>>),
}

/// Serves every connection with `head` followed by `body`. Returns the base URL.
pub async fn raw_server(head: &str, body: Body) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = head.to_string();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(stream, head.clone(), body.clone()));
        }
    });
    format!("http://{addr}")
}

async fn respond(mut stream: TcpStream, head: String, body: Body) {
    let mut request = Vec::new();
    let mut buffer = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buffer[..n]),
        }
    }

    let _ = stream.write_all(head.as_bytes()).await;
    match body {
        Body::None => {}
        Body::Chunked(chunks) => {
            for chunk in chunks {
                write_chunk(&mut stream, &chunk).await;
            }
            let _ = stream.write_all(b"0\r\n\r\n").await;
        }
        Body::ChunkedThenStall(chunks) => {
            for chunk in chunks {
                write_chunk(&mut stream, &chunk).await;
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
    let _ = stream.flush().await;
}

async fn write_chunk(stream: &mut TcpStream, chunk: &[u8]) {
    let _ = stream
        .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
        .await;
    let _ = stream.write_all(chunk).await;
    let _ = stream.write_all(b"\r\n").await;
    let _ = stream.flush().await;
}

/// Response head for a chunked body of `content_type`.
pub fn chunked_head(content_type: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nTransfer-Encoding: chunked\r\n\r\n"
    )
}
