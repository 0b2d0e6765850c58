//! TCP status server. Each connection gets the job list on accept, the
//! changed job on every state change, and may send job commands. Pushes
//! leave out processed file lists.

use super::protocol::{write_message, MessageReader, MessageType, NetworkMessage};
use crate::backup::{BackupManager, JobState};
use crate::error::BackupError;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct StatusServer {
    manager: BackupManager,
    updates: broadcast::Sender<JobState>,
    clients: Arc<Mutex<HashMap<Uuid, SocketAddr>>>,
}

impl StatusServer {
    /// `updates` is the channel job state changes are broadcast on.
    pub fn new(manager: BackupManager, updates: broadcast::Sender<JobState>) -> Self {
        Self {
            manager,
            updates,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accepts connections until `shutdown` flips to true. Open connections
    /// observe the same signal and close.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Status server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, peer, shutdown).await {
                                debug!("Connection {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Status server stopped accepting connections");
        Ok(())
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        let connected = {
            let mut clients = self.clients.lock();
            clients.insert(id, peer);
            clients.len()
        };
        info!("Client {} connected from {} ({} connected)", id, peer, connected);

        // Subscribed before the first push so no change slips between them.
        let mut updates = self.updates.subscribe();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = MessageReader::new(read_half);

        let result = async {
            self.push_status(&mut writer).await?;
            loop {
                tokio::select! {
                    incoming = reader.next_message() => match incoming {
                        Ok(Some(message)) => self.dispatch(message, &mut writer).await?,
                        Ok(None) => {
                            debug!("Client {} closed the connection", id);
                            break;
                        }
                        Err(e @ (BackupError::Protocol(_) | BackupError::Serialization(_))) => {
                            warn!("Dropping client {}: {}", id, e);
                            let reply = NetworkMessage::error(e.to_string());
                            write_message(&mut writer, &reply).await?;
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    },
                    update = updates.recv() => match update {
                        Ok(state) => {
                            let message = NetworkMessage::status(&[state.summary()])?;
                            write_message(&mut writer, &message).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Client {} lagged {} updates, resyncing", id, skipped);
                            self.push_status(&mut writer).await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        let connected = {
            let mut clients = self.clients.lock();
            clients.remove(&id);
            clients.len()
        };
        info!("Client {} disconnected ({} connected)", id, connected);
        result
    }

    async fn dispatch<W: AsyncWrite + Unpin>(
        &self,
        message: NetworkMessage,
        writer: &mut W,
    ) -> Result<()> {
        match message.kind {
            MessageType::JobStatusRequest => self.push_status(writer).await?,
            MessageType::Ping => {
                write_message(writer, &NetworkMessage::new(MessageType::Pong)).await?
            }
            kind if kind.is_command() => {
                let names = match message.job_names() {
                    Ok(names) => names,
                    Err(e) => {
                        let reply = NetworkMessage::error(format!("Invalid job list: {}", e));
                        write_message(writer, &reply).await?;
                        return Ok(());
                    }
                };
                if names.is_empty() {
                    let reply =
                        NetworkMessage::error(format!("{:?} needs at least one job name", kind));
                    write_message(writer, &reply).await?;
                    return Ok(());
                }

                info!("{:?} requested for {:?}", kind, names);
                let manager = self.manager.clone();
                let unknown = tokio::task::spawn_blocking(move || match kind {
                    MessageType::StartJob => manager.start_jobs(&names),
                    MessageType::PauseJob => manager.pause_jobs(&names),
                    MessageType::ResumeJob => manager.resume_jobs(&names),
                    _ => manager.stop_jobs(&names),
                })
                .await?;

                if !unknown.is_empty() {
                    let text = format!("Unknown job(s): {}", unknown.join(", "));
                    let reply = NetworkMessage::error(text);
                    write_message(writer, &reply).await?;
                }
            }
            other => debug!("Ignoring {:?} from client", other),
        }
        Ok(())
    }

    async fn push_status<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let message = NetworkMessage::status(&self.manager.job_summaries())?;
        write_message(writer, &message).await?;
        Ok(())
    }
}
