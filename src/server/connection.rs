//! Per-connection read loop and request dispatch.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{watch, Semaphore};

use super::ServiceMap;
use crate::codec::Serializer;
use crate::error::{Result, RpcError};
use crate::protocol::{
    encode_message, FrameDecoder, Request, Response, ServiceName, STATUS_INTERNAL_ERROR,
    STATUS_NOT_FOUND,
};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What a connection task needs from its server.
pub(crate) struct Dispatcher {
    pub serializer: Serializer,
    pub max_frame_size: usize,
    pub writer: WriterConfig,
    pub services: Arc<ServiceMap>,
    pub workers: Arc<Semaphore>,
}

/// Serve one accepted connection until EOF, a fatal error, or shutdown.
///
/// Handlers already running keep their writer clone, so their responses are
/// still written after the read side stops.
pub(crate) async fn serve_connection<S>(
    stream: S,
    peer: String,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, _writer_task) = spawn_writer_task(write_half, &dispatcher.writer);
    let mut decoder = FrameDecoder::<Request>::new(dispatcher.serializer, dispatcher.max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let result: Result<()> = loop {
        let n = tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            // A failed response write ends the connection.
            _ = writer.closed() => break Err(RpcError::Closed),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e.into()),
            },
        };

        let messages = match decoder.push(&buf[..n]) {
            Ok(messages) => messages,
            Err(e) => break Err(e),
        };

        for message in messages {
            match message {
                Ok(request) => dispatch(request, &dispatcher, &writer).await,
                Err(e) => {
                    tracing::warn!("Undecodable request from {}: {}", peer, e);
                    let response = Response::failure(
                        "",
                        STATUS_INTERNAL_ERROR,
                        format!("undecodable request: {}", e),
                    );
                    respond(&writer, dispatcher.serializer, &response).await;
                }
            }
        }
    };

    match result {
        Ok(()) => tracing::debug!("Connection from {} closed", peer),
        Err(e) => tracing::error!("Connection from {} failed: {}", peer, e),
    }
}

/// Route one request: `404` inline, everything else through the worker pool.
async fn dispatch(request: Request, dispatcher: &Dispatcher, writer: &WriterHandle) {
    let name = ServiceName::new(&request.interface_name, request.version.as_deref());

    let Some(service) = dispatcher.services.get(&name) else {
        tracing::debug!("Request {} for unknown service {}", request.request_id, name);
        let response = Response::failure(
            request.request_id,
            STATUS_NOT_FOUND,
            format!("service not found: {}", name),
        );
        respond(writer, dispatcher.serializer, &response).await;
        return;
    };

    // Waiting here stops reading from this connection until a worker frees up.
    let permit = match dispatcher.workers.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    tracing::debug!(
        "Dispatching {}.{} ({})",
        name,
        request.method_name,
        request.request_id
    );

    let writer = writer.clone();
    let serializer = dispatcher.serializer;

    tokio::spawn(async move {
        let _permit = permit;
        let request_id = request.request_id.clone();

        let invocation = tokio::spawn(async move {
            service
                .invoke(
                    &request.method_name,
                    &request.parameter_types,
                    request.parameters,
                )
                .await
        });

        let response = match invocation.await {
            Ok(Ok(value)) => Response::success(request_id, value),
            Ok(Err(message)) => Response::failure(request_id, STATUS_INTERNAL_ERROR, message),
            Err(e) if e.is_panic() => {
                tracing::error!("Handler for request {} panicked", request_id);
                Response::failure(request_id, STATUS_INTERNAL_ERROR, "Handler panicked")
            }
            Err(e) => Response::failure(request_id, STATUS_INTERNAL_ERROR, e.to_string()),
        };

        respond(&writer, serializer, &response).await;
    });
}

async fn respond(writer: &WriterHandle, serializer: Serializer, response: &Response) {
    let frame = match encode_message(serializer, response) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Failed to encode response {}: {}", response.request_id, e);
            return;
        }
    };

    if let Err(e) = writer.send(frame).await {
        tracing::debug!("Dropping response {}: {}", response.request_id, e);
    }
}
