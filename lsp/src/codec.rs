//! Wire framing for the analysis service.
//!
//! Requests go out as one JSON object per line. Output from the service is
//! either `Content-Length: N\r\n\r\n{json}` framed or a bare JSON line; the
//! reader accepts both so it works against services that mix them.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (16 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads JSON frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next JSON frame.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` on malformed headers, oversized frames, or bad JSON.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let mut line = Vec::new();
        loop {
            let bytes_read = self
                .read_line(&mut line)
                .await
                .context("reading frame line")?;
            if bytes_read == 0 {
                return Ok(None);
            }

            let trimmed = std::str::from_utf8(&line)
                .context("frame line is not UTF-8")?
                .trim();
            if trimmed.is_empty() {
                // Separator left behind after a framed body.
                continue;
            }
            if trimmed.starts_with('{') {
                let value = serde_json::from_str(trimmed).context("parsing JSON line")?;
                return Ok(Some(value));
            }

            let content_length = self.read_headers(trimmed).await?;
            if content_length > MAX_FRAME_BYTES {
                bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
            }
            let mut body = vec![0u8; content_length];
            self.reader
                .read_exact(&mut body)
                .await
                .context("reading frame body")?;
            let value = serde_json::from_slice(&body).context("parsing framed JSON body")?;
            return Ok(Some(value));
        }
    }

    /// Replace `line` with the next line, newline included. Stops reading
    /// once a line outgrows [`MAX_FRAME_BYTES`].
    async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<usize> {
        line.clear();
        let limit = MAX_FRAME_BYTES as u64 + 1;
        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', line)
            .await?;
        if bytes_read > MAX_FRAME_BYTES {
            bail!("line exceeds maximum {MAX_FRAME_BYTES} bytes");
        }
        Ok(bytes_read)
    }

    /// Parse headers starting with `first` until the empty separator line.
    async fn read_headers(&mut self, first: &str) -> Result<usize> {
        let mut content_length = parse_content_length(first)?;
        let mut line = Vec::new();
        loop {
            let bytes_read = self
                .read_line(&mut line)
                .await
                .context("reading header line")?;
            if bytes_read == 0 {
                bail!("unexpected EOF while reading headers");
            }
            let trimmed = std::str::from_utf8(&line)
                .context("header line is not UTF-8")?
                .trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some(len) = parse_content_length(trimmed)? {
                content_length = Some(len);
            }
        }
        match content_length {
            Some(len) => Ok(len),
            None => bail!("missing Content-Length header"),
        }
    }
}

fn parse_content_length(header: &str) -> Result<Option<usize>> {
    let Some((key, value)) = header.split_once(':') else {
        bail!("malformed header line: {header}");
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        // Other headers (e.g. Content-Type) are ignored.
        return Ok(None);
    }
    let len = value
        .trim()
        .parse()
        .context("invalid Content-Length value")?;
    Ok(Some(len))
}

/// Writes newline-terminated JSON requests.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_line(&mut self, msg: &serde_json::Value) -> Result<()> {
        let mut body = serde_json::to_string(msg).context("serializing request")?;
        body.push('\n');
        self.writer
            .write_all(body.as_bytes())
            .await
            .context("writing request")?;
        self.writer.flush().await.context("flushing request")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_framed_body() {
        let body = r#"{"type":"event","event":"semanticDiag"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{body}\n", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        let value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(value["event"], "semanticDiag");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_bare_json_lines() {
        let input = "{\"seq\":1}\n\n{\"seq\":2}\n";
        let mut reader = FrameReader::new(input.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["seq"], 1);
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["seq"], 2);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mixes_framed_and_line_output() {
        let body = r#"{"seq":1}"#;
        let input = format!("Content-Length: {}\r\n\r\n{body}\n{{\"seq\":2}}\n", body.len());
        let mut reader = FrameReader::new(input.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["seq"], 1);
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["seq"], 2);
    }

    #[tokio::test]
    async fn content_length_counts_bytes() {
        let body = r#"{"k":"é"}"#;
        assert_eq!(body.len(), 10);
        let frame = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["k"], "é");
    }

    #[tokio::test]
    async fn ignores_extra_headers() {
        let body = r#"{"seq":7}"#;
        let frame = format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["seq"], 7);
    }

    #[tokio::test]
    async fn missing_content_length_is_error() {
        let buf: &[u8] = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_headers_is_error() {
        let buf: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_body_is_error() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn endless_line_is_rejected_at_the_limit() {
        let mut reader = FrameReader::new(tokio::io::repeat(b'{'));
        let err = reader.read_frame().await.unwrap_err();
        assert!(format!("{err:#}").contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn endless_header_is_rejected_at_the_limit() {
        let input = (&b"Content-Length: 2\r\nX-Pad: "[..]).chain(tokio::io::repeat(b'x'));
        let mut reader = FrameReader::new(input);
        let err = reader.read_frame().await.unwrap_err();
        assert!(format!("{err:#}").contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let padding = MAX_FRAME_BYTES - r#"{"k":""}"#.len() - 1;
        let line = format!("{{\"k\":\"{}\"}}\n", "a".repeat(padding));
        assert_eq!(line.len(), MAX_FRAME_BYTES);
        let mut reader = FrameReader::new(line.as_bytes());
        let value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(value["k"].as_str().unwrap().len(), padding);
    }

    #[tokio::test]
    async fn invalid_json_line_is_error() {
        let buf: &[u8] = b"{not json\n";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn writer_emits_one_line_per_message() {
        let mut buf = Vec::new();
        let mut writer = LineWriter::new(&mut buf);
        writer
            .write_line(&serde_json::json!({"seq": 1, "command": "open"}))
            .await
            .unwrap();
        writer.write_line(&serde_json::json!({"seq": 2})).await.unwrap();
        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(output.ends_with('\n'));
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["command"], "open");
    }
}
