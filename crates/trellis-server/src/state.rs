use std::sync::Arc;
use tokio::sync::broadcast;
use trellis_core::store::Store;

/// Shared application state passed to all route handlers.
///
/// `change_tx` carries a ping per committed mutation so SSE subscribers can
/// refresh; mutation handlers send after their store call returns.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub change_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            store,
            change_tx: tx,
        }
    }

    /// Notify SSE subscribers that something changed. Lossy by design: a
    /// subscriber that lags just refreshes once on the next ping.
    pub fn notify(&self) {
        let _ = self.change_tx.send(());
    }
}
