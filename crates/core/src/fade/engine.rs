use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::Fade;
use crate::{
    model::{Address, Priority},
    Result,
};

/// Receives the full set of active fades once per tick.
pub trait FadeEngineDelegate: Send + Sync {
    fn fades_did_update(&self, fades: &[Fade]);
}

enum Command {
    SetDelegate(Weak<dyn FadeEngineDelegate>),
    Start,
    Stop { ack: Option<Sender<()>> },
    Reset { ack: Option<Sender<()>> },
    Add(Fade),
    Remove {
        address: Address,
        priority: Priority,
        ack: Option<Sender<()>>,
    },
    Snapshot { reply: Sender<Vec<Fade>> },
    Shutdown,
}

/// Advances every active fade in lockstep on a private thread.
///
/// All commands are serialised with the ticks on that thread, so reading,
/// advancing and reporting the fades is atomic with respect to adding and
/// removing them. The next tick is scheduled only after the delegate returns.
pub struct FadeEngine {
    tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    running: Arc<AtomicBool>,
    interval: Duration,
}

impl FadeEngine {
    pub fn new(interval: Duration) -> Result<Self> {
        let (tx, rx) = unbounded();
        let join = thread::Builder::new()
            .name("fade-engine".to_string())
            .spawn(move || run(rx, interval))?;

        Ok(Self {
            tx,
            thread_id: join.thread().id(),
            join: Some(join),
            running: Arc::new(AtomicBool::new(false)),
            interval,
        })
    }

    /// Sets the receiver of tick callbacks. The engine holds it weakly.
    pub fn set_delegate(&self, delegate: Weak<dyn FadeEngineDelegate>) {
        self.send(Command::SetDelegate(delegate));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Begins ticking. Does nothing when already running.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.send(Command::Start);
    }

    /// Halts ticking but keeps the fades so a later [`start`](Self::start)
    /// resumes them. No tick callback begins after this returns.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.call(|ack| Command::Stop { ack });
    }

    /// Halts ticking and discards every fade.
    pub fn reset(&self) {
        self.running.store(false, Ordering::Release);
        self.call(|ack| Command::Reset { ack });
    }

    /// Appends a fade. Callers remove any fade already running for the same
    /// key first.
    pub fn add_fade(&self, fade: Fade) {
        self.send(Command::Add(fade));
    }

    /// Removes every fade for the key. Once this returns no tick will report
    /// the removed fades.
    pub fn remove_fade(&self, address: Address, priority: Priority) {
        self.call(|ack| Command::Remove {
            address,
            priority,
            ack,
        });
    }

    /// Snapshot of the fades currently owned by the engine. `None` when
    /// called from the engine thread, where a delegate already has the
    /// fades of the current tick, or once the engine thread has exited.
    pub fn fades(&self) -> Option<Vec<Fade>> {
        if self.on_engine_thread() {
            return None;
        }
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(Command::Snapshot { reply });
        rx.recv().ok()
    }

    fn on_engine_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Sends a command and waits for the engine to process it, unless called
    /// from the engine thread itself where waiting would never finish.
    fn call(&self, command: impl FnOnce(Option<Sender<()>>) -> Command) {
        if self.on_engine_thread() {
            self.send(command(None));
            return;
        }
        let (ack, done) = crossbeam_channel::bounded(1);
        self.send(command(Some(ack)));
        let _ = done.recv();
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("fade engine thread has exited");
        }
    }
}

impl Drop for FadeEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            if !self.on_engine_thread() && join.join().is_err() {
                warn!("fade engine thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for FadeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FadeEngine")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run(rx: Receiver<Command>, interval: Duration) {
    debug!(?interval, "fade engine started");
    let mut delegate: Option<Weak<dyn FadeEngineDelegate>> = None;
    let mut fades: Vec<Fade> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            None => {
                tick(&mut fades, delegate.as_ref());
                deadline = Some(Instant::now() + interval);
            }
            Some(Command::SetDelegate(new_delegate)) => delegate = Some(new_delegate),
            Some(Command::Start) => {
                if deadline.is_none() {
                    deadline = Some(Instant::now() + interval);
                }
            }
            Some(Command::Stop { ack }) => {
                deadline = None;
                acknowledge(ack);
            }
            Some(Command::Reset { ack }) => {
                deadline = None;
                fades.clear();
                acknowledge(ack);
            }
            Some(Command::Add(fade)) => fades.push(fade),
            Some(Command::Remove {
                address,
                priority,
                ack,
            }) => {
                fades.retain(|fade| fade.key() != (address, priority));
                acknowledge(ack);
            }
            Some(Command::Snapshot { reply }) => {
                let _ = reply.send(fades.clone());
            }
            Some(Command::Shutdown) => break,
        }
    }

    debug!("fade engine stopped");
}

fn tick(fades: &mut [Fade], delegate: Option<&Weak<dyn FadeEngineDelegate>>) {
    for fade in fades.iter_mut() {
        fade.advance();
    }
    if let Some(delegate) = delegate.and_then(Weak::upgrade) {
        delegate.fades_did_update(fades);
    }
}

fn acknowledge(ack: Option<Sender<()>>) {
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}
