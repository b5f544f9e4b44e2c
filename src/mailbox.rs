//! The shared mailbox: a fixed set of fields with a single writer each, read by
//! the other agent through `Acquire`/`Release` atomics.
//!
//! On the original co-processor substrate this was a physical page mapped into
//! both agents' address spaces at the offsets in `consts::mailbox_offset`. Here
//! the two agents are OS threads sharing one heap-allocated [`MailboxPage`]; the
//! offsets table still documents the contract, it just isn't a literal pointer
//! arithmetic base anymore. Buffer fields live behind `UnsafeCell` because the
//! handoff protocol — not the type system — is what keeps access single-writer;
//! each view only exposes the operations its agent is allowed to perform.

use crate::consts::{INIT_BUF_LEN, PACKET_BUF_LEN};
use crate::error::MailboxError;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Bus state as observed by the supervisor; written only by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusStatus {
    Idle = 0,
    Reset = 1,
    Enabled = 2,
    RcvdPack = 3,
    Sending = 4,
    Writing = 5,
    Unknown = 6,
}

impl BusStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BusStatus::Idle,
            1 => BusStatus::Reset,
            2 => BusStatus::Enabled,
            3 => BusStatus::RcvdPack,
            4 => BusStatus::Sending,
            5 => BusStatus::Writing,
            _ => BusStatus::Unknown,
        }
    }
}

/// Handoff flag: SET is written by the engine after a packet arrives; GO/SKIP
/// are written by the supervisor once it has decided whether (and what) to reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Handoff {
    Set = 0,
    Go = 1,
    Skip = 2,
}

impl Handoff {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Handoff::Go,
            2 => Handoff::Skip,
            _ => Handoff::Set,
        }
    }
}

/// Engine-reported error code, cleared by the supervisor after it logs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    BadPacketBegin = 1,
    ExtraInit = 2,
    DestMismatch = 3,
}

impl ErrorCode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ErrorCode::BadPacketBegin,
            2 => ErrorCode::ExtraInit,
            3 => ErrorCode::DestMismatch,
            _ => ErrorCode::None,
        }
    }
}

/// The shared page itself. Never constructed directly by either agent; split
/// into views via [`MailboxPage::split`].
pub struct MailboxPage {
    status: AtomicU8,
    id1: AtomicU8,
    id2: AtomicU8,
    handoff: AtomicU8,
    error: AtomicU8,
    taken: AtomicBool,
    received: UnsafeCell<[u8; PACKET_BUF_LEN]>,
    response: UnsafeCell<[u8; PACKET_BUF_LEN]>,
    init_reply: [UnsafeCell<[u8; INIT_BUF_LEN]>; 2],
}

// SAFETY: every field is either an atomic or an UnsafeCell whose mutable
// access is gated by the handoff protocol enforced by EngineView/SupervisorView
// — at most one agent ever holds write access to a given buffer at a time.
unsafe impl Sync for MailboxPage {}

impl MailboxPage {
    fn new() -> Self {
        MailboxPage {
            status: AtomicU8::new(BusStatus::Unknown as u8),
            id1: AtomicU8::new(0xFF),
            id2: AtomicU8::new(0xFF),
            handoff: AtomicU8::new(Handoff::Set as u8),
            error: AtomicU8::new(ErrorCode::None as u8),
            taken: AtomicBool::new(false),
            received: UnsafeCell::new([0; PACKET_BUF_LEN]),
            response: UnsafeCell::new([0; PACKET_BUF_LEN]),
            init_reply: [
                UnsafeCell::new([0; INIT_BUF_LEN]),
                UnsafeCell::new([0; INIT_BUF_LEN]),
            ],
        }
    }

    /// Build one shared page and split it into the engine's and supervisor's
    /// typed half-duplex views.
    pub fn split() -> (EngineView, SupervisorView) {
        Self::split_existing(Arc::new(MailboxPage::new()))
            .expect("freshly allocated page is never already taken")
    }

    /// Split an already-constructed page, failing if it was already claimed by
    /// another engine/supervisor pair. Guards against the same shared page
    /// being handed out twice, which would silently break the single-writer
    /// assumption each view relies on.
    pub fn split_existing(page: Arc<MailboxPage>) -> Result<(EngineView, SupervisorView), MailboxError> {
        if page.taken.swap(true, Ordering::AcqRel) {
            return Err(MailboxError::AlreadyTaken);
        }
        Ok((
            EngineView { page: page.clone() },
            SupervisorView { page },
        ))
    }
}

/// The engine's view: write access to status/IDs/error/received buffer/INIT
/// templates, read access to the handoff flag and response buffer.
#[derive(Clone)]
pub struct EngineView {
    page: Arc<MailboxPage>,
}

impl EngineView {
    pub fn set_status(&self, status: BusStatus) {
        self.page.status.store(status as u8, Ordering::Release);
    }

    pub fn set_id1(&self, id: u8) {
        self.page.id1.store(id, Ordering::Release);
    }

    pub fn set_id2(&self, id: u8) {
        self.page.id2.store(id, Ordering::Release);
    }

    pub fn set_error(&self, error: ErrorCode) {
        self.page.error.store(error as u8, Ordering::Release);
    }

    /// Written by the engine the instant a packet is fully received, before
    /// `set_status(RcvdPack)` is observed — establishing happens-before for the
    /// buffer contents relative to the status transition (ordering guarantee 1).
    pub fn received_buf_mut(&self) -> &mut [u8; PACKET_BUF_LEN] {
        // SAFETY: only the engine ever calls this, and only while no supervisor
        // read of the same buffer is concurrently in flight (the supervisor only
        // reads it after observing status == RcvdPack via an Acquire load).
        unsafe { &mut *self.page.received.get() }
    }

    pub fn init_template_mut(&self, which: usize) -> &mut [u8; INIT_BUF_LEN] {
        // SAFETY: INIT templates are engine-private working storage; the
        // supervisor never reads them.
        unsafe { &mut *self.page.init_reply[which].get() }
    }

    /// Set the handoff flag to SET, signaling the supervisor a packet has arrived.
    pub fn request_dispatch(&self) {
        self.page
            .handoff
            .store(Handoff::Set as u8, Ordering::Release);
    }

    /// Busy-wait for the supervisor to resolve the handoff to GO or SKIP.
    pub fn wait_for_handoff(&self) -> Handoff {
        loop {
            let v = Handoff::from_u8(self.page.handoff.load(Ordering::Acquire));
            if v != Handoff::Set {
                return v;
            }
            std::hint::spin_loop();
        }
    }

    /// Read the response buffer the supervisor built; only valid after
    /// `wait_for_handoff` returned `Go`.
    pub fn response_buf(&self) -> &[u8; PACKET_BUF_LEN] {
        // SAFETY: the Acquire load in wait_for_handoff synchronizes with the
        // supervisor's Release store after it finished writing this buffer
        // (ordering guarantee 2).
        unsafe { &*self.page.response.get() }
    }
}

/// The supervisor's view: read access to status/IDs/error/received buffer,
/// write access to the response buffer and handoff flag.
#[derive(Clone)]
pub struct SupervisorView {
    page: Arc<MailboxPage>,
}

impl SupervisorView {
    pub fn status(&self) -> BusStatus {
        BusStatus::from_u8(self.page.status.load(Ordering::Acquire))
    }

    pub fn id1(&self) -> u8 {
        self.page.id1.load(Ordering::Acquire)
    }

    pub fn id2(&self) -> u8 {
        self.page.id2.load(Ordering::Acquire)
    }

    pub fn take_error(&self) -> ErrorCode {
        let code = ErrorCode::from_u8(self.page.error.load(Ordering::Acquire));
        if code != ErrorCode::None {
            self.page.error.store(ErrorCode::None as u8, Ordering::Release);
        }
        code
    }

    /// Read the packet the engine just received; only valid while status is
    /// `RcvdPack` and before the handoff is resolved.
    pub fn received_buf(&self) -> &[u8; PACKET_BUF_LEN] {
        // SAFETY: the Acquire load of `status()` that observed RcvdPack
        // synchronizes with the engine's Release store in `request_dispatch`,
        // which happens-after the buffer was fully written.
        unsafe { &*self.page.received.get() }
    }

    pub fn response_buf_mut(&self) -> &mut [u8; PACKET_BUF_LEN] {
        // SAFETY: only the supervisor ever calls this, strictly before it
        // stores Go/Skip to the handoff flag.
        unsafe { &mut *self.page.response.get() }
    }

    /// Release the engine to transmit the response buffer as-is.
    pub fn go(&self) {
        #[cfg(feature = "log")]
        log::trace!("handoff GO");
        self.page.handoff.store(Handoff::Go as u8, Ordering::Release);
    }

    /// Release the engine without transmitting anything.
    pub fn skip(&self) {
        #[cfg(feature = "log")]
        log::trace!("handoff SKIP");
        self.page.handoff.store(Handoff::Skip as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitting_an_already_taken_page_fails() {
        let page = Arc::new(MailboxPage::new());
        let (_engine, _supervisor) = MailboxPage::split_existing(page.clone()).unwrap();
        let second = MailboxPage::split_existing(page);
        assert!(matches!(second, Err(MailboxError::AlreadyTaken)));
    }

    #[test]
    fn fresh_split_is_always_ok() {
        let (_engine, _supervisor) = MailboxPage::split();
    }
}
