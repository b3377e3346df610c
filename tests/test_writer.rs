use std::time::Duration;

use harbor::http::response::{ResponseBuilder, StatusCode};
use harbor::http::writer::{ResponseWriter, WriteError, WriteOptions};

const TIMEOUT: Duration = Duration::from_secs(5);

fn keep_alive() -> WriteOptions {
    WriteOptions {
        keep_alive: true,
        ..Default::default()
    }
}

async fn write(writer: &mut ResponseWriter) -> (String, u64) {
    let mut out = Vec::new();
    let sent = writer.write_to_stream(&mut out, TIMEOUT).await.unwrap();
    (String::from_utf8(out).unwrap(), sent)
}

#[tokio::test]
async fn test_writer_fixed_length_body() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body("hello")
        .build();
    let mut writer = ResponseWriter::new(response, keep_alive());

    assert_eq!(writer.content_length(), Some(5));
    assert!(writer.keep_alive());

    let (out, sent) = write(&mut writer).await;
    assert_eq!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello"
    );
    assert_eq!(sent, 5);
}

#[tokio::test]
async fn test_writer_declared_length_matches_bytes_sent() {
    let payload = vec![b'x'; 20_000];
    let response = ResponseBuilder::new(StatusCode::Ok).body(payload.clone()).build();
    let mut writer = ResponseWriter::new(response, WriteOptions::default());

    let mut out = Vec::new();
    let sent = writer.write_to_stream(&mut out, TIMEOUT).await.unwrap();

    let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let head = String::from_utf8(out[..split].to_vec()).unwrap();
    assert!(head.contains("Content-Length: 20000\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(&out[split..], &payload[..]);
    assert_eq!(sent, 20_000);
}

#[tokio::test]
async fn test_writer_streams_file_body() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    std::fs::write(&path, b"<p>hi</p>").unwrap();
    let file = tokio::fs::File::open(&path).await.unwrap();

    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/html; charset=utf-8")
        .file(file, 9)
        .build();
    let mut writer = ResponseWriter::new(response, keep_alive());

    let (out, sent) = write(&mut writer).await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 9\r\n"));
    assert!(out.ends_with("\r\n\r\n<p>hi</p>"));
    assert_eq!(sent, 9);
}

#[tokio::test]
async fn test_writer_short_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.bin");
    std::fs::write(&path, b"12345").unwrap();
    let file = tokio::fs::File::open(&path).await.unwrap();

    // Declared longer than the file really is, as after a concurrent truncate.
    let response = ResponseBuilder::new(StatusCode::Ok).file(file, 10).build();
    let mut writer = ResponseWriter::new(response, keep_alive());

    let mut out = Vec::new();
    let err = writer.write_to_stream(&mut out, TIMEOUT).await.unwrap_err();
    assert!(matches!(
        err,
        WriteError::ShortBody {
            written: 5,
            expected: 10
        }
    ));
}

#[tokio::test]
async fn test_writer_chunks_unknown_length_body() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/html")
        .stream(&b"abc"[..])
        .build();
    let mut writer = ResponseWriter::new(response, keep_alive());

    assert_eq!(writer.content_length(), None);
    assert!(writer.keep_alive());

    let (out, sent) = write(&mut writer).await;
    assert_eq!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\nConnection: keep-alive\r\n\r\n3\r\nabc\r\n0\r\n\r\n"
    );
    assert_eq!(sent, 3);
}

#[tokio::test]
async fn test_writer_http10_unknown_length_closes() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .stream(&b"abc"[..])
        .build();
    let mut writer = ResponseWriter::new(
        response,
        WriteOptions {
            keep_alive: true,
            http10: true,
            ..Default::default()
        },
    );

    assert!(!writer.keep_alive());

    let (out, _) = write(&mut writer).await;
    assert_eq!(out, "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nabc");
}

#[tokio::test]
async fn test_writer_head_sends_headers_only() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body("hello")
        .build();
    let mut writer = ResponseWriter::new(
        response,
        WriteOptions {
            keep_alive: true,
            head_only: true,
            ..Default::default()
        },
    );

    let (out, sent) = write(&mut writer).await;
    assert_eq!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\n"
    );
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn test_writer_not_modified_has_no_body() {
    let response = ResponseBuilder::new(StatusCode::NotModified)
        .header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
        .body("ignored")
        .build();
    let mut writer = ResponseWriter::new(response, keep_alive());

    assert_eq!(writer.content_length(), None);

    let (out, sent) = write(&mut writer).await;
    assert_eq!(
        out,
        "HTTP/1.1 304 Not Modified\r\nConnection: keep-alive\r\nLast-Modified: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\n"
    );
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn test_writer_drops_headers_with_line_breaks() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("X-Injected", "a\r\nSet-Cookie: evil=1")
        .header("X-Safe", "ok")
        .build();
    let mut writer = ResponseWriter::new(response, WriteOptions::default());

    let (out, _) = write(&mut writer).await;
    assert!(!out.contains("Set-Cookie"));
    assert!(out.contains("X-Safe: ok\r\n"));
}

#[tokio::test]
async fn test_writer_times_out_on_stalled_reader() {
    // The peer never reads, so the pipe fills and the write stalls.
    let (mut client, _server) = tokio::io::duplex(16);
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(vec![b'z'; 4096])
        .build();
    let mut writer = ResponseWriter::new(response, WriteOptions::default());

    let err = writer
        .write_to_stream(&mut client, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Timeout));
}
