//! Serial delivery context for view notifications.
//!
//! Models post "state changed" closures here instead of calling their delegate
//! directly, so slow view work never blocks whoever changed the state.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error, warn};

use crate::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Notifier {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn new(name: &str) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let thread_name = format!("{name}-notify");
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(thread = %thread_name, "notifier started");
                while let Ok(job) = rx.recv() {
                    job();
                }
                debug!(thread = %thread_name, "notifier stopped");
            })?;

        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queues `f` for delivery. Never blocks.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(Box::new(f)) {
            error!("failed to queue notification: {e}");
        }
    }

    /// Waits until everything posted before this call has been delivered.
    /// Returns immediately when called from the notifier thread.
    pub fn flush(&self) {
        if self.on_notifier_thread() {
            return;
        }
        let (ack, done) = crossbeam_channel::bounded(1);
        self.post(move || {
            let _ = ack.send(());
        });
        let _ = done.recv();
    }

    fn on_notifier_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("notifier thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish()
    }
}
