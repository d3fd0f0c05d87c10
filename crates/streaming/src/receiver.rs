//! Server side: accept connections and answer framed requests.
//!
//! Each accepted connection gets its own task. Requests on one connection are
//! answered strictly in order, one reply per request; concurrency comes from
//! callers opening several connections.

use crate::codec::{read_frame, write_frame};
use crate::error::StreamingError;
use corelib::protocol::{Reply, Request, RequestId, Response};
use corelib::{Error, RequestHandler};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

/// Serve `handler` on `listener` until `shutdown` resolves.
///
/// Connections already accepted keep running until their peer hangs up.
pub async fn serve<F>(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(addr = %local, "shutting down listener");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, handler).await {
                        tracing::debug!(%peer, error = %e, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), StreamingError> {
    stream.set_nodelay(true)?;
    let (rd, wr) = stream.split();
    let mut rd = BufReader::new(rd);
    let mut wr = BufWriter::new(wr);
    tracing::debug!(%peer, "connection accepted");

    loop {
        let request: Request = match read_frame(&mut rd).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(StreamingError::Codec(e)) => {
                tracing::warn!(%peer, error = %e, "undecodable request");
                write_frame(&mut wr, &malformed(e.to_string())).await?;
                continue;
            }
            Err(e @ StreamingError::FrameTooLarge(_)) => {
                tracing::warn!(%peer, error = %e, "dropping connection");
                write_frame(&mut wr, &malformed(e.to_string())).await?;
                break;
            }
            Err(e) => return Err(e),
        };

        let operation = request.body.operation();
        let reply = handler.handle(request).await;
        tracing::trace!(%peer, operation, response = %reply.response_id(), "replying");
        write_frame(&mut wr, &reply).await?;
    }

    tracing::debug!(%peer, "connection closed");
    Ok(())
}

fn malformed(message: String) -> Reply {
    Response::failure_from(RequestId::NIL, &Error::Malformed(message)).into()
}
