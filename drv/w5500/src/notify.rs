// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wakeups for the receive worker.
//!
//! The worker sleeps on a single-slot channel. Whoever stands in for the
//! interrupt handler holds a [`Notifier`] and posts to it; posting never
//! blocks and never touches the bus, and any number of posts made before the
//! worker gets around to looking collapse into one wake. In polling mode a
//! [`PollTimer`] thread posts on a fixed period instead.

use std::sync::mpsc::{self, RecvTimeoutError, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ringbuf::*;

use crate::W5500Error;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    TimerStart(u32),
    TimerStop,
    Wake(Wake),
}
ringbuf!(Trace, 8, Trace::None);

/// Posting end of the worker's wakeup channel. Clone it freely.
#[derive(Clone, Debug)]
pub struct Notifier(mpsc::SyncSender<()>);

impl Notifier {
    /// Wakes the worker. Safe to call from any context that may use a
    /// channel; if a wake is already pending, this one merges into it.
    pub fn notify(&self) {
        match self.0.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => (),
            // The worker has exited; nobody left to wake.
            Err(TrySendError::Disconnected(())) => (),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Wake {
    Notified,
    TimedOut,
    Closed,
}

pub(crate) struct Wakeup(mpsc::Receiver<()>);

impl Wakeup {
    /// Blocks until notified, or until `timeout` passes if there is one.
    pub fn wait(&self, timeout: Option<Duration>) -> Wake {
        let wake = match timeout {
            None => match self.0.recv() {
                Ok(()) => Wake::Notified,
                Err(_) => Wake::Closed,
            },
            Some(t) => match self.0.recv_timeout(t) {
                Ok(()) => Wake::Notified,
                Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
                Err(RecvTimeoutError::Disconnected) => Wake::Closed,
            },
        };
        ringbuf_entry!(Trace::Wake(wake));
        wake
    }
}

pub(crate) fn channel() -> (Notifier, Wakeup) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Notifier(tx), Wakeup(rx))
}

/// Posts to a [`Notifier`] once per period until stopped.
pub(crate) struct PollTimer {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl PollTimer {
    pub fn start(
        period: Duration,
        notifier: Notifier,
    ) -> Result<Self, W5500Error> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("w5500_poll".into())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) =
                    stopped.recv_timeout(period)
                {
                    notifier.notify();
                }
            })
            .map_err(|_| W5500Error::SpawnFailed)?;
        ringbuf_entry!(Trace::TimerStart(period.as_millis() as u32));
        Ok(Self { stop, thread })
    }

    /// Stops the timer and waits for its thread to exit. No notification is
    /// posted after this returns.
    pub fn stop(self) {
        ringbuf_entry!(Trace::TimerStop);
        drop(self.stop);
        if self.thread.join().is_err() {
            log::error!("poll timer thread panicked");
        }
    }
}
