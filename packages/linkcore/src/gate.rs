//! Binary "link usable" signal shared between the supervisor and the session task.

use core::cell::RefCell;
use core::future::poll_fn;
use core::net::Ipv4Addr;
use core::task::Poll;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Concurrent readers parked in [`ReadinessGate::wait`] at once. A full
/// registration wakes everyone and they re-register, so this is a soft bound.
pub const GATE_WAITERS: usize = 4;

struct GateState {
    ready: bool,
    address: Option<Ipv4Addr>,
    waiters: MultiWakerRegistration<GATE_WAITERS>,
}

/// Set exactly while the station link is `Connected`.
///
/// Only the link supervisor in this crate can set or clear it. Everyone else
/// observes it through [`is_set`](Self::is_set), [`wait`](Self::wait) and
/// [`address`](Self::address).
pub struct ReadinessGate<M: RawMutex> {
    state: Mutex<M, RefCell<GateState>>,
}

impl<M: RawMutex> ReadinessGate<M> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(GateState {
                ready: false,
                address: None,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Opens the gate and wakes every waiter. Returns `false` when it was
    /// already open; waiters are not woken a second time.
    pub(crate) fn set(&self) -> bool {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.ready {
                return false;
            }
            state.ready = true;
            state.waiters.wake();
            true
        })
    }

    /// Closes the gate. Returns `false` when it was already closed.
    pub(crate) fn clear(&self) -> bool {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.address = None;
            if !state.ready {
                return false;
            }
            state.ready = false;
            true
        })
    }

    pub(crate) fn record_address(&self, address: Ipv4Addr) {
        self.state.lock(|cell| cell.borrow_mut().address = Some(address));
    }

    pub fn is_set(&self) -> bool {
        self.state.lock(|cell| cell.borrow().ready)
    }

    /// Station address published with the last `set`, `None` while closed.
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.state.lock(|cell| {
            let state = cell.borrow();
            if state.ready {
                state.address
            } else {
                None
            }
        })
    }

    /// Resolves immediately when open, otherwise parks until the next `set`.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            self.state.lock(|cell| {
                let mut state = cell.borrow_mut();
                if state.ready {
                    Poll::Ready(())
                } else {
                    state.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await
    }
}

impl<M: RawMutex> Default for ReadinessGate<M> {
    fn default() -> Self {
        Self::new()
    }
}
