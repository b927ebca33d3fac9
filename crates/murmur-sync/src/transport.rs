//! WebSocket transport between a [`GatewayLink`] and the push server.
//!
//! One connection at a time. On connect: `Identify`, then replay joined
//! rooms and presence. Commands queued while offline are discarded, since
//! the replay already restores what still matters. Any socket error ends
//! the connection; the loop reconnects after a jittered delay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, info, trace, warn};

use murmur_types::events::{GatewayCommand, GatewayEvent};

use crate::error::Result;
use crate::gateway::GatewayLink;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `ws://` or `wss://` endpoint of the gateway.
    pub url: String,
    pub token: String,
    /// Base reconnect delay; each wait is scaled by a factor in `[0.5, 1.5)`.
    pub reconnect_delay: Duration,
}

/// Why a connection ended.
enum Ended {
    /// Socket closed or failed; reconnect.
    Disconnected,
    /// Every gateway handle is gone; stop for good.
    Shutdown,
}

/// Drive the link until the session drops its gateway.
pub async fn run(mut link: GatewayLink, config: TransportConfig) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        if !discard_queued(&mut link.commands) {
            break;
        }

        match connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                attempt = 0;
                info!(url = %config.url, "gateway connected");
                match session(&mut link, socket, &config.token).await {
                    Ended::Shutdown => break,
                    Ended::Disconnected => {
                        link.set_connected(false);
                        warn!("gateway disconnected");
                    }
                }
            }
            Err(e) => {
                attempt += 1;
                warn!(url = %config.url, attempt, "gateway connect failed: {}", e);
            }
        }

        if link.gateway().is_none() {
            break;
        }
        tokio::time::sleep(jittered(config.reconnect_delay)).await;
    }
    link.set_connected(false);
    info!("gateway transport stopped");
    Ok(())
}

async fn session<S>(link: &mut GatewayLink, socket: S, token: &str) -> Ended
where
    S: futures_util::Stream<Item = std::result::Result<Frame, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Frame, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    let mut opening = vec![GatewayCommand::Identify {
        token: token.to_string(),
    }];
    opening.extend(link.replay_commands());
    for command in &opening {
        if let Err(e) = send_command(&mut sink, command).await {
            warn!("handshake failed: {}", e);
            return Ended::Disconnected;
        }
    }
    debug!(replayed = opening.len() - 1, "subscriptions replayed");
    link.set_connected(true);

    loop {
        tokio::select! {
            command = link.commands.recv() => {
                let Some(command) = command else {
                    let _ = sink.send(Frame::Close(None)).await;
                    return Ended::Shutdown;
                };
                if let Err(e) = send_command(&mut sink, &command).await {
                    warn!("command not sent: {}", e);
                    return Ended::Disconnected;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                            Ok(event) => {
                                trace!(kind = event.kind(), "gateway event");
                                if !link.deliver(event) {
                                    return Ended::Shutdown;
                                }
                            }
                            Err(e) => warn!("unparseable gateway frame: {}", e),
                        }
                    }
                    Some(Ok(Frame::Ping(_))) => {
                        // The pong is queued by tungstenite; flush pushes it out.
                        if sink.flush().await.is_err() {
                            return Ended::Disconnected;
                        }
                    }
                    Some(Ok(Frame::Close(reason))) => {
                        debug!(?reason, "gateway closed the connection");
                        return Ended::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("gateway read error: {}", e);
                        return Ended::Disconnected;
                    }
                    None => return Ended::Disconnected,
                }
            }
        }
    }
}

async fn send_command<K>(sink: &mut K, command: &GatewayCommand) -> Result<()>
where
    K: futures_util::Sink<Frame, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(command)?;
    sink.send(Frame::text(json)).await?;
    Ok(())
}

/// Drop whatever piled up while offline. Returns false once the command
/// stream has ended.
fn discard_queued(commands: &mut UnboundedReceiver<GatewayCommand>) -> bool {
    let mut dropped = 0usize;
    loop {
        match commands.try_recv() {
            Ok(_) => dropped += 1,
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
    if dropped > 0 {
        debug!(dropped, "discarded commands queued while offline");
    }
    true
}

fn jittered(base: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.5..1.5);
    base.mul_f64(factor)
}
