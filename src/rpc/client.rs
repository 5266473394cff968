//! Client side of the plugin socket, used by `probe` and tests.

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, instrument};

use super::TransportError;
use super::message::{CsiRequest, CsiResponse};

/// A connection to a plugin socket. Requests are answered in order.
pub struct RpcClient {
    path: Utf8PathBuf,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RpcClient {
    /// Connects to the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the connection is refused.
    pub async fn connect(path: &Utf8Path) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| TransportError::Io {
                action: "connect to",
                path: path.to_owned(),
                source,
            })?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            path: path.to_owned(),
            reader: BufReader::new(read),
            writer,
        })
    }

    /// Sends `request` and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the exchange fails. Operation
    /// failures arrive as [`CsiResponse::Error`], not as `Err`.
    #[instrument(skip_all, fields(method = request.method()))]
    pub async fn call(&mut self, request: &CsiRequest) -> Result<CsiResponse, TransportError> {
        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        self.writer
            .write_all(&payload)
            .await
            .map_err(|source| self.io_error("write to", source))?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|source| self.io_error("read from", source))?;
        if read == 0 {
            return Err(TransportError::Closed);
        }
        let response: CsiResponse = serde_json::from_str(&line)?;
        debug!(?response, "response received");
        Ok(response)
    }

    fn io_error(&self, action: &'static str, source: std::io::Error) -> TransportError {
        TransportError::Io {
            action,
            path: self.path.clone(),
            source,
        }
    }
}
