//! Scripted stand-in for a Tor control port, used by tests.

use super::endpoint::ControlEndpoint;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type Responder = Box<dyn FnMut(&str) -> String + Send>;

pub(crate) struct FakeDaemon {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeDaemon {
    /// Listen on an ephemeral port, answering every command line with
    /// whatever `responder` returns
    pub(crate) async fn spawn<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let responder: Arc<StdMutex<Responder>> = Arc::new(StdMutex::new(Box::new(responder)));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let open = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let handle = {
            let commands = commands.clone();
            let open = open.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    open.fetch_add(1, Ordering::SeqCst);
                    accepted.fetch_add(1, Ordering::SeqCst);

                    let responder = responder.clone();
                    let commands = commands.clone();
                    let open = open.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = socket.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            let line = line.trim_end().to_string();
                            commands.lock().await.push(line.clone());
                            let reply = {
                                let mut responder = responder.lock().unwrap();
                                (*responder)(&line)
                            };
                            if write.write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            commands,
            open,
            accepted,
            handle,
        }
    }

    pub(crate) fn endpoint(&self, secret: &str) -> ControlEndpoint {
        ControlEndpoint::new(self.addr.ip().to_string(), self.addr.port(), secret)
    }

    /// Every command line received so far, across all connections
    pub(crate) async fn commands(&self) -> Vec<String> {
        self.commands.lock().await.clone()
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait (bounded) until no client connection is open
    pub(crate) async fn wait_all_closed(&self) -> bool {
        for _ in 0..200 {
            if self.open_connections() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
