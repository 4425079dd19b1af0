//! [`TunnelTransport`] over a WebSocket, using tokio-tungstenite.
//!
//! The socket lives in a task on the tokio runtime. The tick thread talks to
//! it through two unbounded channels: commands go out, events come back and
//! are drained with `try_recv`, so nothing on the tick side ever awaits.
//!
//! A fresh event channel is created per connection attempt, so a late
//! `Closed` from a previous socket can never be mistaken for the current one.

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Fragment, TransportError, TunnelEndpoint, TunnelEvent, TunnelTransport};

enum Command {
    Send(Message),
    Close,
}

/// WebSocket client driven from the scheduler tick.
pub struct WsTransport {
    runtime: Handle,
    commands: Option<mpsc::UnboundedSender<Command>>,
    events: Option<mpsc::UnboundedReceiver<TunnelEvent>>,
}

impl WsTransport {
    /// Socket tasks are spawned on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            commands: None,
            events: None,
        }
    }

    fn queue(&self, message: Message) -> Result<(), TransportError> {
        let commands = self.commands.as_ref().ok_or(TransportError::NotConnected)?;
        commands
            .send(Command::Send(message))
            .map_err(|_| TransportError::NotConnected)
    }
}

impl TunnelTransport for WsTransport {
    fn connect(&mut self, endpoint: &TunnelEndpoint) -> Result<(), TransportError> {
        self.close();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.runtime
            .spawn(run_socket(endpoint.url(), command_rx, event_tx));
        self.commands = Some(command_tx);
        self.events = Some(event_rx);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8], fragment: Fragment) -> Result<(), TransportError> {
        self.queue(encode(bytes, fragment))
    }

    fn receive(&mut self) -> Option<TunnelEvent> {
        self.events.as_mut()?.try_recv().ok()
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        self.queue(Message::Ping(Vec::new().into()))
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            // Fails only when the socket task is already gone.
            let _ = commands.send(Command::Close);
        }
        self.events = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Map one message part onto a WebSocket message or raw frame.
///
/// Whole messages go out as text, or binary when they are not UTF-8. A
/// multi-part stream always opens as binary: later parts are unknown when the
/// first one is sent, and one stray byte would make a text message invalid.
fn encode(bytes: &[u8], fragment: Fragment) -> Message {
    match fragment {
        Fragment::Whole => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        },
        Fragment::First => Message::Frame(Frame::message(
            bytes.to_vec(),
            OpCode::Data(Data::Binary),
            false,
        )),
        Fragment::Continue => Message::Frame(Frame::message(
            bytes.to_vec(),
            OpCode::Data(Data::Continue),
            false,
        )),
        Fragment::Last => Message::Frame(Frame::message(
            bytes.to_vec(),
            OpCode::Data(Data::Continue),
            true,
        )),
    }
}

/// Own one socket for its whole life: connect, pump both directions, report.
async fn run_socket(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TunnelEvent>,
) {
    let connect = tokio_tungstenite::connect_async(url.as_str());
    let ws_stream = tokio::select! {
        result = connect => match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                debug!("Tunnel: websocket connect failed: {e}");
                let _ = events.send(TunnelEvent::Error(e.to_string()));
                let _ = events.send(TunnelEvent::Closed);
                return;
            }
        },
        // Closed (or dropped) before the handshake finished.
        _ = commands.recv() => return,
    };

    info!("Tunnel: websocket open");
    if events.send(TunnelEvent::Opened).is_err() {
        return;
    }
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = ws_sink.send(message).await {
                        warn!("Tunnel: websocket send failed: {e}");
                        let _ = events.send(TunnelEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = ws_stream.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => TunnelEvent::Text(text.as_str().as_bytes().to_vec()),
                    Some(Ok(Message::Binary(data))) => TunnelEvent::Text(data.to_vec()),
                    Some(Ok(Message::Ping(_))) => TunnelEvent::Ping,
                    Some(Ok(Message::Pong(_))) => TunnelEvent::Pong,
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Tunnel: websocket read failed: {e}");
                        let _ = events.send(TunnelEvent::Error(e.to_string()));
                        break;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
    let _ = events.send(TunnelEvent::Closed);
}
