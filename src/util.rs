use anyhow::{anyhow, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::Notify;

/// Single slot channel. A new value overwrites one the receiver has not
/// picked up yet, so the receiver always sees the most recent value.
pub fn latest_value_channel<T>() -> (LatestSender<T>, LatestReceiver<T>) {
    let value = Arc::new(Mutex::new(None));
    let notify = Arc::new(Notify::new());
    let both_alive = Arc::new(AtomicBool::new(true));

    let sender = LatestSender {
        value: Arc::clone(&value),
        notify: Arc::clone(&notify),
        both_alive: Arc::clone(&both_alive),
    };
    let receiver = LatestReceiver {
        value,
        notify,
        both_alive,
    };
    (sender, receiver)
}

pub struct LatestSender<T> {
    value: Arc<Mutex<Option<T>>>,
    notify: Arc<Notify>,
    both_alive: Arc<AtomicBool>,
}

impl<T> LatestSender<T> {
    pub fn send(&self, value: T) -> Result<()> {
        if !self.both_alive.load(Ordering::SeqCst) {
            Err(anyhow!("Other end died"))
        } else {
            *self
                .value
                .lock()
                .map_err(|_| anyhow!("Latest value lock poisoned"))? = Some(value);
            self.notify.notify_one();
            Ok(())
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.both_alive.load(Ordering::SeqCst)
    }
}

impl<T> Drop for LatestSender<T> {
    fn drop(&mut self) {
        self.both_alive.store(false, Ordering::SeqCst);
        self.notify.notify_waiters()
    }
}

pub struct LatestReceiver<T> {
    value: Arc<Mutex<Option<T>>>,
    notify: Arc<Notify>,
    both_alive: Arc<AtomicBool>,
}

impl<T> LatestReceiver<T> {
    /// Waits for the next value.
    pub async fn recv(&self) -> Result<T> {
        loop {
            if let Some(value) = self.take()? {
                return Ok(value);
            }
            if !self.both_alive.load(Ordering::SeqCst) {
                return Err(anyhow!("Sender died"));
            }
            self.notify.notified().await;
        }
    }

    /// Takes the pending value if there is one, never waits. A value sent
    /// before the sender was dropped is still handed out.
    pub fn try_recv(&self) -> Result<Option<T>> {
        match self.take()? {
            Some(value) => Ok(Some(value)),
            None if !self.both_alive.load(Ordering::SeqCst) => Err(anyhow!("Sender died")),
            None => Ok(None),
        }
    }

    fn take(&self) -> Result<Option<T>> {
        Ok(self
            .value
            .lock()
            .map_err(|_| anyhow!("Latest value lock poisoned"))?
            .take())
    }
}

impl<T> Drop for LatestReceiver<T> {
    fn drop(&mut self) {
        self.both_alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_value_is_kept() {
        let (sender, receiver) = latest_value_channel();
        assert_eq!(receiver.try_recv().unwrap(), None);
        sender.send(1).unwrap();
        sender.send(2).unwrap();
        assert_eq!(receiver.try_recv().unwrap(), Some(2));
        assert_eq!(receiver.try_recv().unwrap(), None);
    }

    #[test]
    fn dropped_sender_is_reported_after_last_value() {
        let (sender, receiver) = latest_value_channel();
        sender.send("reset").unwrap();
        drop(sender);
        assert_eq!(receiver.try_recv().unwrap(), Some("reset"));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn send_fails_without_receiver() {
        let (sender, receiver) = latest_value_channel::<u8>();
        drop(receiver);
        assert!(sender.is_closed());
        assert!(sender.send(1).is_err());
    }

    #[tokio::test]
    async fn recv_waits_for_value() {
        let (sender, receiver) = latest_value_channel();
        let handle = tokio::spawn(async move { receiver.recv().await });
        tokio::task::yield_now().await;
        sender.send(7_u32).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 7);
    }
}
