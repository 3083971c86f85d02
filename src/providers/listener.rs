use crate::providers::ipc::bind_socket;
use crate::providers::ipc::read_frame;
use crate::providers::ipc::write_frame;
use crate::providers::ipc::Envelope;
use crate::providers::ipc::IpcError;
use crate::providers::ipc::IpcFrame;
use futures_util::stream;
use futures_util::Stream;
use log::debug;
use log::info;
use log::warn;
use std::path::Path;
use std::time::Duration;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const COLLECTOR_CAPACITY: usize = 256;

/// Many-to-one inbound side of the bus: any number of short lived pushers
/// connect and write message frames, which end up on a single channel.
pub struct IpcCollectorImpl {
    receiver: mpsc::Receiver<Envelope>,
    accept_task: JoinHandle<()>,
}

impl IpcCollectorImpl {
    pub fn bind(socket_path: &Path) -> Result<Self, IpcError> {
        let listener = bind_socket(socket_path)?;
        let (sender, receiver) = mpsc::channel(COLLECTOR_CAPACITY);

        let path = socket_path.to_path_buf();
        let accept_task = tokio::spawn(async move {
            info!("collecting on {}", path.display());
            loop {
                match listener.accept().await {
                    Ok((mut stream, _)) => {
                        let sender = sender.clone();
                        tokio::spawn(async move {
                            loop {
                                match read_frame(&mut stream).await {
                                    Ok(Some(IpcFrame::Message(envelope))) => {
                                        if sender.send(envelope).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Some(other)) => {
                                        warn!("collector ignoring frame {:?}", other);
                                    }
                                    Ok(None) => break,
                                    Err(err) => {
                                        debug!("pusher dropped: {}", err);
                                        break;
                                    }
                                }
                            }
                        });
                    }
                    Err(err) => warn!("failed to accept pusher: {}", err),
                }
            }
        });

        Ok(Self {
            receiver,
            accept_task,
        })
    }
}

impl IpcCollectorImpl {
    /// Waits at most `wait` for the first pending message, then drains
    /// whatever else is already queued without waiting again.
    pub async fn drain(&mut self, wait: Duration) -> Vec<Envelope> {
        let mut drained = Vec::new();

        match tokio::time::timeout(wait, self.receiver.recv()).await {
            Ok(Some(envelope)) => drained.push(envelope),
            Ok(None) | Err(_) => return drained,
        }

        while let Ok(envelope) = self.receiver.try_recv() {
            drained.push(envelope);
        }

        drained
    }
}

impl Drop for IpcCollectorImpl {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// A dedicated subscriber handle. Dropping it closes the socket, which is the
/// only thing the publisher needs to forget about it.
pub struct IpcSubscriberImpl {
    reader: OwnedReadHalf,
    _writer: OwnedWriteHalf,
}

impl IpcSubscriberImpl {
    pub async fn connect(socket_path: &Path, prefixes: Vec<String>) -> Result<Self, IpcError> {
        let handshake = async {
            let stream = UnixStream::connect(socket_path)
                .await
                .map_err(|e| IpcError::Connect {
                    path: socket_path.to_path_buf(),
                    source: e,
                })?;
            let (mut reader, mut writer) = stream.into_split();

            write_frame(&mut writer, &IpcFrame::Subscribe { prefixes }).await?;

            match read_frame(&mut reader).await? {
                Some(IpcFrame::Ready) => Ok(Self {
                    reader,
                    _writer: writer,
                }),
                Some(_) => Err(IpcError::UnexpectedFrame),
                None => Err(IpcError::Closed),
            }
        };

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(result) => result,
            Err(_) => Err(IpcError::Timeout(socket_path.to_path_buf())),
        }
    }
}

impl IpcSubscriberImpl {
    pub async fn recv(&mut self) -> Result<Envelope, IpcError> {
        match read_frame(&mut self.reader).await? {
            Some(IpcFrame::Message(envelope)) => Ok(envelope),
            Some(_) => Err(IpcError::UnexpectedFrame),
            None => Err(IpcError::Closed),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Envelope, IpcError>> {
        stream::unfold(Some(self), |state| async move {
            let mut subscriber = state?;
            match subscriber.recv().await {
                Ok(envelope) => Some((Ok(envelope), Some(subscriber))),
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::emitter::IpcPublisherImpl;
    use crate::providers::emitter::IpcPusherImpl;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn pushed_events_reach_the_collector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.ipc");
        let mut collector = IpcCollectorImpl::bind(&path).unwrap();

        let pusher = IpcPusherImpl::new(&path);
        pusher.emit("237-urls-status", "{}").await.unwrap();
        pusher.emit("237-chat", "hi").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 2 {
            received.extend(collector.drain(Duration::from_secs(2)).await);
        }
        let topics: Vec<_> = received.iter().map(|e| e.topic.as_str()).collect();
        assert!(topics.contains(&"237-urls-status"));
        assert!(topics.contains(&"237-chat"));
    }

    #[tokio::test]
    async fn drain_returns_empty_after_bounded_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = IpcCollectorImpl::bind(&dir.path().join("notify.ipc")).unwrap();

        assert!(collector.drain(Duration::from_millis(50)).await.is_empty());
    }

    #[tokio::test]
    async fn subscribers_only_see_their_prefixes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.ipc");
        let publisher = IpcPublisherImpl::bind(&path).unwrap();

        let mut twelve = IpcSubscriberImpl::connect(&path, vec!["012-".to_string()])
            .await
            .unwrap();
        let everything = IpcSubscriberImpl::connect(&path, vec!["".to_string()])
            .await
            .unwrap();

        publisher.publish(Envelope::new("237-file-cmdfile", "a"));
        publisher.publish(Envelope::new("012-file-comm.log", "b"));
        publisher.publish(Envelope::new("012-urls-gpsstr", "c"));

        assert_eq!(twelve.recv().await.unwrap().payload, "b");
        assert_eq!(twelve.recv().await.unwrap().payload, "c");

        let all: Vec<_> = everything
            .into_stream()
            .take(3)
            .map(|r| r.unwrap().payload)
            .collect()
            .await;
        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.ipc");
        let publisher = IpcPublisherImpl::bind(&path).unwrap();

        let subscriber = IpcSubscriberImpl::connect(&path, vec!["".to_string()])
            .await
            .unwrap();
        assert_eq!(publisher.subscriber_count(), 1);

        drop(subscriber);

        for _ in 0..50 {
            if publisher.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
