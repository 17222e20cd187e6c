use super::health::{HealthState, ServiceStatus};
use crate::core::{ControllerError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The listener that is started once the process is ready to serve.
#[async_trait]
pub trait RpcServer: Send + Sync {
    /// Serves until [`RpcServer::stop`] is called.
    async fn run(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    fn stop(&self);
}

/// Answers every TCP connection with a minimal HTTP response carrying the health status:
/// 200 when up, 503 otherwise.
pub struct StatusServer {
    bind_addr: String,
    health: Arc<HealthState>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    stop_tx: watch::Sender<bool>,
}

impl StatusServer {
    pub fn new(bind_addr: impl Into<String>, health: Arc<HealthState>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            bind_addr: bind_addr.into(),
            health,
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            stop_tx,
        }
    }

    /// Address actually bound, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn respond(mut socket: TcpStream, status: ServiceStatus) -> std::io::Result<()> {
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await?;

        let code = match status {
            ServiceStatus::Up => "200 OK",
            ServiceStatus::Initializing | ServiceStatus::Down => "503 Service Unavailable",
        };
        let body = status.value();
        let response = format!(
            "HTTP/1.1 {code}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }
}

#[async_trait]
impl RpcServer for StatusServer {
    async fn run(&self) -> Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            return Ok(());
        }

        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|err| {
            ControllerError::FatalStartup(format!(
                "Failed to bind status listener on {}: {}",
                self.bind_addr, err
            ))
        })?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock()? = Some(addr);
        self.running.store(true, Ordering::SeqCst);
        info!(%addr, "status listener started");

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "status request");
                            let status = self.health.status();
                            tokio::spawn(async move {
                                if let Err(err) = Self::respond(socket, status).await {
                                    debug!(error = %err, "status response failed");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "status listener accept failed"),
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(%addr, "status listener stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
