//! Two-lane frame channels connecting processors
//!
//! Every processor inbox has a priority lane for system frames and a FIFO
//! data lane. Order is preserved within a lane; system frames (Start,
//! Cancel, Error, interruptions) overtake queued data. Lanes are unbounded
//! so two neighbors pushing at each other can never deadlock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::{Error, Frame, FrameDirection, FrameKind, Result};

/// A frame plus the direction it is travelling
#[derive(Debug)]
pub struct Envelope {
    pub frame: Frame,
    pub direction: FrameDirection,
}

/// Counts StartInterruption frames queued for one inbox
///
/// Raised by the sender before the frame enters the system lane, so a
/// processor busy inside `process_frame` can notice the interruption
/// without waiting for the dispatch loop to dequeue it.
#[derive(Clone, Default)]
pub struct InterruptSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    raised: AtomicU64,
    notify: Notify,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interruptions raised so far
    pub fn generation(&self) -> u64 {
        self.inner.raised.load(Ordering::SeqCst)
    }

    pub fn raise(&self) {
        self.inner.raised.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once the generation moves past `seen`
    pub async fn raised_since(&self, seen: u64) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.generation() > seen {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for InterruptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptSignal")
            .field("generation", &self.generation())
            .finish()
    }
}

/// Sending half of a processor inbox
#[derive(Clone)]
pub struct FrameSender {
    name: Arc<str>,
    system: mpsc::UnboundedSender<Envelope>,
    data: mpsc::UnboundedSender<Envelope>,
    interrupts: InterruptSignal,
}

impl FrameSender {
    /// Name of the processor (or boundary) owning the inbox
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a frame on the lane matching its priority
    pub fn send(&self, frame: Frame, direction: FrameDirection) -> Result<()> {
        if matches!(frame.kind(), FrameKind::StartInterruption) && !self.is_closed() {
            self.interrupts.raise();
        }
        let lane = if frame.is_system() {
            &self.system
        } else {
            &self.data
        };
        lane.send(Envelope { frame, direction })
            .map_err(|_| Error::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.data.is_closed()
    }
}

impl fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSender").field("name", &self.name).finish()
    }
}

/// Receiving half of a processor inbox
pub struct FrameReceiver {
    system: mpsc::UnboundedReceiver<Envelope>,
    data: mpsc::UnboundedReceiver<Envelope>,
    /// Data frames kept back by [`FrameReceiver::discard_interruptible`]
    deferred: VecDeque<Envelope>,
    interrupts: InterruptSignal,
}

impl FrameReceiver {
    /// Signal raised whenever a StartInterruption is sent to this inbox
    pub fn interrupt_signal(&self) -> InterruptSignal {
        self.interrupts.clone()
    }

    /// Next envelope, system lane first. `None` once all senders are gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Ok(envelope) = self.system.try_recv() {
            return Some(envelope);
        }
        if let Some(envelope) = self.deferred.pop_front() {
            return Some(envelope);
        }
        tokio::select! {
            biased;
            Some(envelope) = self.system.recv() => Some(envelope),
            Some(envelope) = self.data.recv() => Some(envelope),
            else => None,
        }
    }

    /// Drop queued interruptible data frames, keeping the rest in order
    ///
    /// Returns the number of frames discarded.
    pub fn discard_interruptible(&mut self) -> usize {
        let mut kept = VecDeque::new();
        let mut discarded = 0;

        let queued = std::mem::take(&mut self.deferred);
        let mut pending = queued.into_iter().collect::<Vec<_>>();
        while let Ok(envelope) = self.data.try_recv() {
            pending.push(envelope);
        }

        for envelope in pending {
            if envelope.frame.is_interruptible() {
                discarded += 1;
            } else {
                kept.push_back(envelope);
            }
        }

        self.deferred = kept;
        discarded
    }

    /// Stop accepting frames; pending ones can still be drained
    pub fn close(&mut self) {
        self.system.close();
        self.data.close();
    }
}

impl fmt::Debug for FrameReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReceiver")
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

/// Create an inbox for the named processor
pub fn frame_channel(name: impl Into<Arc<str>>) -> (FrameSender, FrameReceiver) {
    let (system_tx, system_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let interrupts = InterruptSignal::new();
    (
        FrameSender {
            name: name.into(),
            system: system_tx,
            data: data_tx,
            interrupts: interrupts.clone(),
        },
        FrameReceiver {
            system: system_rx,
            data: data_rx,
            deferred: VecDeque::new(),
            interrupts,
        },
    )
}
