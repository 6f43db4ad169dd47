//! TCP debug server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::protocol::{DebugCommand, DebugResponse};

/// Implemented by the application to answer debug commands
pub trait DebugHandler: Send + Sync + 'static {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse;
}

/// Debug server handle - keep this alive to keep the server running
pub struct DebugServer {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl DebugServer {
    /// Start the debug server on `127.0.0.1:port`.
    ///
    /// Must be called inside a tokio runtime. Returns immediately; bind
    /// errors are logged by the background task.
    pub fn start(handler: Arc<Mutex<dyn DebugHandler>>, port: u16) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match Self::bind(handler, SocketAddr::from(([127, 0, 0, 1], port))).await {
                Ok(server) => {
                    if let Err(e) = server.handle.await {
                        log::error!("Debug server task ended: {}", e);
                    }
                }
                Err(e) => log::error!("Failed to bind debug server on port {}: {}", port, e),
            }
        })
    }

    /// Bind `addr` and serve connections in the background
    pub async fn bind(
        handler: Arc<Mutex<dyn DebugHandler>>,
        addr: SocketAddr,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Debug server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("Debug client connected from {}", peer);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, handler).await;
                            log::info!("Debug client disconnected: {}", peer);
                        });
                    }
                    Err(e) => log::error!("Debug server accept error: {}", e),
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Answer one request line
pub fn dispatch(line: &str, handler: &mut dyn DebugHandler) -> DebugResponse {
    match serde_json::from_str::<DebugCommand>(line) {
        Ok(cmd) => {
            log::debug!("Debug command: {:?}", cmd);
            handler.handle_command(cmd)
        }
        Err(e) => DebugResponse::error(format!("Invalid command JSON: {}", e)),
    }
}

/// Serve line-delimited JSON requests until the peer hangs up
pub async fn serve_connection<S>(stream: S, handler: Arc<Mutex<dyn DebugHandler>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = {
                    let mut h = handler.lock().await;
                    dispatch(trimmed, &mut *h)
                };

                let mut resp_json = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!(
                        "{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}",
                        e
                    )
                });
                resp_json.push('\n');

                if let Err(e) = writer.write_all(resp_json.as_bytes()).await {
                    log::error!("Debug server write error: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    log::error!("Debug server flush error: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Debug server read error: {}", e);
                break;
            }
        }
    }
}
