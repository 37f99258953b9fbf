//! Newline-delimited JSON-RPC transport over the proxy's own stdio.
//!
//! This is the host-side transport: the proxy reads requests from its own
//! stdin and writes responses to its own stdout, one JSON object per line,
//! exactly as the external-interfaces section describes for the upstream
//! wire format — the proxy is just as much a line-delimited JSON-RPC peer
//! to its host as its upstreams are to it.

use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Stdin, Stdout,
};

use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse};

/// Reads requests from stdin and writes responses to stdout.
pub struct StdioTransport {
    reader: BufReader<Stdin>,
    writer: BufWriter<Stdout>,
}

impl StdioTransport {
    /// Creates a transport attached to the process's stdin/stdout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: BufWriter::new(tokio::io::stdout()),
        }
    }

    /// Reads the next line, or `None` on EOF.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Writes a successful response, newline-terminated.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> std::io::Result<()> {
        self.write_line(response).await
    }

    /// Writes an error response, newline-terminated.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    pub async fn write_error(&mut self, error: &JsonRpcError) -> std::io::Result<()> {
        self.write_line(error).await
    }

    async fn write_line<T: serde::Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(serialized.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
