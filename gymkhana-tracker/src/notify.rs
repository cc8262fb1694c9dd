// Race notifications
//
// Subscribers are invoked synchronously while the tracker still holds its state
// locks, so every notification reflects a consistent state. Callbacks must
// return quickly and must not call back into the tracker. Channel subscribers
// receive a clone of every notification on an unbounded tokio channel.

use gymkhana_event::Lap;
use gymkhana_schema::Rider;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

/// Something display or orchestration code may want to react to
#[derive(Debug, Clone)]
pub enum Notification {
    /// A rider entered the empty start box
    RiderWaiting(Rider),
    /// The start box is empty again
    StartEmpty,
    /// A lap was completed
    RiderMatched(Lap),
    /// A rider did not finish, inferred or by staff decision
    RiderDnf(Lap),
}

type Callback = Box<dyn Fn(&Notification) + Send + Sync>;

/// Registry of notification subscribers
#[derive(Default)]
pub struct Notifier {
    callbacks: RwLock<Vec<Callback>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Box::new(callback));
    }

    /// Register a channel subscriber
    pub fn channel(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().push(tx);
        rx
    }

    /// Deliver a notification to every subscriber, dropping closed channels
    pub fn notify(&self, notification: &Notification) {
        trace!(?notification, "Notifying subscribers");

        for callback in self.callbacks.read().iter() {
            callback(notification);
        }
        self.channels
            .lock()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len() + self.channels.lock().len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("callbacks", &self.callbacks.read().len())
            .field("channels", &self.channels.lock().len())
            .finish()
    }
}
