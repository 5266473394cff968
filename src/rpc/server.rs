//! Accept loop serving [`CsiRequest`]s on a Unix socket.

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, instrument, warn};

use super::dispatch::CsiDriver;
use super::message::{CsiRequest, CsiResponse};
use super::{MAX_REQUEST_BYTES, TransportError};
use crate::driver::Status;

/// Serves one [`CsiDriver`] on a Unix socket.
pub struct RpcServer {
    listener: UnixListener,
    path: Utf8PathBuf,
    driver: Arc<CsiDriver>,
}

impl RpcServer {
    /// Binds `path`, removing a stale socket file left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the stale file cannot be removed
    /// or the socket cannot be bound.
    pub fn bind(path: &Utf8Path, driver: Arc<CsiDriver>) -> Result<Self, TransportError> {
        match std::fs::remove_file(path) {
            Ok(()) => info!(%path, "removed stale socket"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(TransportError::Io {
                    action: "remove stale socket",
                    path: path.to_owned(),
                    source,
                });
            }
        }
        let listener = UnixListener::bind(path).map_err(|source| TransportError::Io {
            action: "bind",
            path: path.to_owned(),
            source,
        })?;
        info!(%path, "listening");
        Ok(Self {
            listener,
            path: path.to_owned(),
            driver,
        })
    }

    /// Socket path the server listens on.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Accepts connections until `shutdown` resolves, then removes the
    /// socket file. Each connection is served on its own task.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the socket file cannot be removed
    /// on shutdown.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let driver = Arc::clone(&self.driver);
                        let path = self.path.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, &driver, &path).await {
                                warn!(error = %err, "connection error");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
            }
        }

        info!(path = %self.path, "shutting down");
        drop(self.listener);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TransportError::Io {
                action: "remove socket",
                path: self.path,
                source,
            }),
        }
    }
}

fn io_error(action: &'static str, path: &Utf8Path) -> impl Fn(std::io::Error) -> TransportError {
    let socket = path.to_owned();
    move |source| TransportError::Io {
        action,
        path: socket.clone(),
        source,
    }
}

/// One unit read from a connection.
#[derive(Debug, Eq, PartialEq)]
enum Frame {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// Reads up to the next newline without buffering more than
/// [`MAX_REQUEST_BYTES`].
async fn next_frame<R>(reader: &mut R) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_REQUEST_BYTES)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    let complete = buf.last() == Some(&b'\n');
    if !complete && u64::try_from(read).unwrap_or(u64::MAX) >= MAX_REQUEST_BYTES {
        return Ok(Frame::TooLong);
    }
    Ok(Frame::Line(buf))
}

async fn reply(
    write: &mut (impl AsyncWrite + Unpin),
    response: &CsiResponse,
    path: &Utf8Path,
) -> Result<(), TransportError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    write
        .write_all(&payload)
        .await
        .map_err(io_error("write to", path))
}

#[instrument(skip_all)]
async fn serve_connection(
    stream: UnixStream,
    driver: &CsiDriver,
    path: &Utf8Path,
) -> Result<(), TransportError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let line = match next_frame(&mut reader)
            .await
            .map_err(io_error("read from", path))?
        {
            Frame::Line(line) => line,
            Frame::Eof => break,
            Frame::TooLong => {
                warn!(
                    limit = MAX_REQUEST_BYTES,
                    "request too large, closing connection"
                );
                let status = Status::invalid_argument(format!(
                    "request exceeds {MAX_REQUEST_BYTES} bytes"
                ));
                reply(&mut write, &CsiResponse::Error(status), path).await?;
                return Ok(());
            }
        };
        if line.trim_ascii().is_empty() {
            continue;
        }
        let response = match serde_json::from_slice::<CsiRequest>(&line) {
            Ok(request) => driver.dispatch(request).await,
            Err(err) => {
                debug!(error = %err, "rejecting malformed request");
                CsiResponse::Error(Status::invalid_argument(format!(
                    "malformed request: {err}"
                )))
            }
        };
        reply(&mut write, &response, path).await?;
    }
    debug!("connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_split_on_newlines() {
        let mut input: &[u8] = b"{\"method\":\"Probe\"}\n\ntail";

        assert_eq!(
            next_frame(&mut input).await.expect("frame"),
            Frame::Line(b"{\"method\":\"Probe\"}\n".to_vec())
        );
        assert_eq!(
            next_frame(&mut input).await.expect("frame"),
            Frame::Line(b"\n".to_vec())
        );
        assert_eq!(
            next_frame(&mut input).await.expect("frame"),
            Frame::Line(b"tail".to_vec())
        );
        assert_eq!(next_frame(&mut input).await.expect("frame"), Frame::Eof);
    }

    #[tokio::test]
    async fn oversized_line_is_not_buffered_whole() {
        let limit = usize::try_from(MAX_REQUEST_BYTES).expect("limit fits");
        let huge = vec![b'a'; limit.saturating_mul(2)];
        let mut input: &[u8] = &huge;

        assert_eq!(next_frame(&mut input).await.expect("frame"), Frame::TooLong);
        assert_eq!(input.len(), limit);
    }
}
