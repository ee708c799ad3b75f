//! Asynchronous event fan-out.
//!
//! The event bus decouples the playback engine from its observers: the
//! control thread publishes [`Event`]s onto an unbounded channel and a
//! dedicated dispatch thread delivers them to every subscriber in FIFO
//! order. The bus is never touched from the audio callback; the engine
//! publishes from its control surface only.

use std::{
    sync::{Arc, Mutex},
    thread,
};

use crossbeam_channel::{unbounded, Sender};

use crate::{error::Result, events::Event};

/// Callback invoked for every published event.
pub type Subscriber = Box<dyn Fn(Event) + Send + 'static>;

enum Message {
    Publish(Event),
    Shutdown,
}

/// Single-dispatch-loop event bus.
///
/// `start` spawns the dispatch thread, `stop` drains it and joins.
/// Events published while the bus is stopped are dropped with a warning.
#[derive(Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    sender: Mutex<Option<Sender<Message>>>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventBus {
    /// Creates a stopped bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. Subscribers persist across `stop`/`start`.
    pub fn subscribe(&self, subscriber: Subscriber) -> Result<()> {
        self.subscribers.lock()?.push(subscriber);
        Ok(())
    }

    /// Starts the dispatch thread.
    ///
    /// Calling `start` on a running bus is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut sender = self.sender.lock()?;
        if sender.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded();
        let subscribers = Arc::clone(&self.subscribers);
        let handle = thread::Builder::new()
            .name("event-bus".to_string())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Publish(event) => {
                            if let Ok(subscribers) = subscribers.lock() {
                                for subscriber in subscribers.iter() {
                                    subscriber(event);
                                }
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
            })
            .map_err(crate::error::Error::from)?;

        *sender = Some(tx);
        *self.dispatcher.lock()? = Some(handle);

        debug!("event bus started");
        Ok(())
    }

    /// Stops the dispatch thread after delivering already-queued events.
    ///
    /// Calling `stop` on a stopped bus is a no-op.
    pub fn stop(&self) -> Result<()> {
        let sender = self.sender.lock()?.take();
        if let Some(sender) = sender {
            // Queued events drain before the shutdown marker is reached.
            let _ = sender.send(Message::Shutdown);
        }

        let handle = self.dispatcher.lock()?.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("event bus dispatcher panicked");
            }
        }

        debug!("event bus stopped");
        Ok(())
    }

    /// Queues `event` for delivery to all subscribers.
    ///
    /// Events from one publisher are delivered in publish order.
    pub fn publish(&self, event: Event) {
        match self.sender.lock() {
            Ok(sender) => match sender.as_ref() {
                Some(sender) => {
                    if sender.send(Message::Publish(event)).is_err() {
                        warn!("event bus dispatcher gone, dropping {event:?}");
                    }
                }
                None => warn!("event bus not running, dropping {event:?}"),
            },
            Err(_) => warn!("event bus poisoned, dropping {event:?}"),
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
