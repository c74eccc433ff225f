use tokio::sync::{broadcast, mpsc};

/// Receives the external shutdown request and tells the node's listeners about it.
pub(crate) struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    external_shutdown: mpsc::UnboundedReceiver<()>,
}

/// Lets the owner of a node stop it.
#[derive(Clone)]
pub struct Handle {
    external_shutdown: mpsc::UnboundedSender<()>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_started: bool,
}

impl Handle {
    /// Asks the node loop to stop. Does nothing if the loop already exited.
    pub fn shutdown(&mut self) {
        self.shutdown_started = true;
        if self.external_shutdown.send(()).is_err() {
            log::debug!("Node loop already stopped");
        }
    }

    pub fn is_shutdown_started(&self) -> bool {
        self.shutdown_started
    }

    /// Resolves once the node loop has stopped.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

impl ShutdownManager {
    pub(crate) fn init() -> (ShutdownManager, Handle) {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (external_tx, external_rcv) = mpsc::unbounded_channel();
        let handle = Handle {
            external_shutdown: external_tx,
            shutdown_tx: shutdown_tx.clone(),
            shutdown_started: false,
        };
        let manager = Self {
            shutdown_tx,
            external_shutdown: external_rcv,
        };
        (manager, handle)
    }

    /// Waits for a shutdown request. All handles being dropped counts as one.
    pub(crate) async fn requested(&mut self) {
        self.external_shutdown.recv().await;
    }

    pub(crate) fn stop(self) {
        log::info!("Node stopped");
        //Nobody listening is fine
        let _ = self.shutdown_tx.send(());
    }
}
