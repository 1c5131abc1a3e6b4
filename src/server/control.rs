//! Side channel that can stop the reactor.
//!
//! Characters sent through a [`ControlHandle`] are queued on a channel and
//! the reactor is woken through a `mio::Waker`; the reactor drains the
//! channel when the waker token shows up as readable.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::{Registry, Token, Waker};
use tracing::debug;

/// Sending half of the control channel. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: Sender<char>,
    waker: Arc<Waker>,
    quit_char: char,
}

/// Receiving half, owned by the reactor.
#[derive(Debug)]
pub struct ControlChannel {
    receiver: Receiver<char>,
    handle: ControlHandle,
}

impl ControlChannel {
    pub fn new(registry: &Registry, token: Token, quit_char: char) -> io::Result<Self> {
        let waker = Arc::new(Waker::new(registry, token)?);
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            receiver,
            handle: ControlHandle {
                sender,
                waker,
                quit_char,
            },
        })
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Drains everything sent so far. Returns true if the quit character was
    /// among it.
    pub fn drain(&self) -> bool {
        let mut quit = false;
        for ch in self.receiver.try_iter() {
            if ch == self.handle.quit_char {
                quit = true;
            } else if !ch.is_whitespace() {
                debug!(input = ?ch, "ignoring control input");
            }
        }
        quit
    }
}

impl ControlHandle {
    pub fn send(&self, ch: char) -> anyhow::Result<()> {
        self.sender
            .send(ch)
            .map_err(|_| anyhow::anyhow!("reactor has stopped"))?;
        self.waker.wake()?;
        Ok(())
    }

    /// Asks the reactor to stop.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.send(self.quit_char)
    }
}

/// Forwards stdin to the control channel from a background thread.
///
/// The thread ends on end-of-input or once the reactor is gone.
pub fn spawn_console(handle: ControlHandle) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for byte in stdin.lock().bytes() {
                let Ok(byte) = byte else { break };
                if handle.send(char::from(byte)).is_err() {
                    break;
                }
            }
            debug!("console closed");
        })
}
