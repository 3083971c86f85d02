use crate::providers::ipc::bind_socket;
use crate::providers::ipc::read_frame;
use crate::providers::ipc::write_frame;
use crate::providers::ipc::Envelope;
use crate::providers::ipc::IpcError;
use crate::providers::ipc::IpcFrame;
use log::debug;
use log::info;
use log::warn;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const SEND_TIMEOUT: Duration = Duration::from_millis(200);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);
const FAN_OUT_CAPACITY: usize = 256;

/// Pushes events into the notifier's collector socket. Each call opens a short
/// lived connection, so a worker never holds IPC state between events.
#[derive(Clone)]
pub struct IpcPusherImpl {
    socket_path: PathBuf,
}

impl IpcPusherImpl {
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
        }
    }
}

impl IpcPusherImpl {
    pub async fn emit(&self, topic: &str, payload: &str) -> Result<(), IpcError> {
        let frame = IpcFrame::Message(Envelope::new(topic, payload));
        let push = async {
            let mut stream =
                UnixStream::connect(&self.socket_path)
                    .await
                    .map_err(|e| IpcError::Connect {
                        path: self.socket_path.clone(),
                        source: e,
                    })?;
            write_frame(&mut stream, &frame).await
        };

        match tokio::time::timeout(SEND_TIMEOUT, push).await {
            Ok(result) => result,
            Err(_) => Err(IpcError::Timeout(self.socket_path.clone())),
        }
    }
}

/// Fan-out side of the bus. Every subscriber connection gets its own task and
/// its own broadcast receiver; a subscriber that falls behind loses messages
/// instead of slowing anyone else down.
pub struct IpcPublisherImpl {
    sender: broadcast::Sender<Envelope>,
    accept_task: JoinHandle<()>,
}

impl IpcPublisherImpl {
    pub fn bind(socket_path: &Path) -> Result<Self, IpcError> {
        let listener = bind_socket(socket_path)?;
        let (sender, _rx) = broadcast::channel(FAN_OUT_CAPACITY);

        let fan_out = sender.clone();
        let path = socket_path.to_path_buf();
        let accept_task = tokio::spawn(async move {
            info!("publishing on {}", path.display());
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let receiver = fan_out.subscribe();
                        tokio::spawn(async move {
                            if let Err(err) = serve_subscriber(stream, receiver).await {
                                debug!("subscriber dropped: {}", err);
                            }
                        });
                    }
                    Err(err) => warn!("failed to accept subscriber: {}", err),
                }
            }
        });

        Ok(Self {
            sender,
            accept_task,
        })
    }
}

impl IpcPublisherImpl {
    /// Returns the number of subscriber connections the message was queued for.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Drop for IpcPublisherImpl {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_subscriber(
    stream: UnixStream,
    mut receiver: broadcast::Receiver<Envelope>,
) -> Result<(), IpcError> {
    let (mut read_half, mut write_half) = stream.into_split();

    let prefixes = match tokio::time::timeout(SUBSCRIBE_TIMEOUT, read_frame(&mut read_half)).await {
        Ok(Ok(Some(IpcFrame::Subscribe { prefixes }))) => prefixes,
        Ok(Ok(Some(_))) => return Err(IpcError::UnexpectedFrame),
        Ok(Ok(None)) => return Err(IpcError::Closed),
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(IpcError::Closed),
    };
    write_frame(&mut write_half, &IpcFrame::Ready).await?;
    debug!("subscriber attached for {:?}", prefixes);

    loop {
        tokio::select! {
            // a subscriber never sends after the handshake, so any read
            // completing means it went away
            _ = read_frame(&mut read_half) => {
                return Err(IpcError::Closed);
            }
            received = receiver.recv() => match received {
                Ok(envelope) => {
                    if envelope.matches_any(&prefixes) {
                        write_frame(&mut write_half, &IpcFrame::Message(envelope)).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("subscriber lagging, {} messages dropped", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}
