// SPDX-License-Identifier: GPL-3.0-only
//! Load generations
//!
//! Each value load for the selected device takes a [`LoadTicket`]. Starting a
//! new load cancels the previous ticket's token and bumps the generation, so
//! a slow reply for a device the user has moved away from is recognised as
//! stale and dropped before it reaches the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Inner {
    generation: AtomicU64,
    token: Mutex<CancellationToken>,
}

#[derive(Clone, Default)]
pub struct LoadTracker {
    inner: Arc<Inner>,
}

/// Handle for one load attempt
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    token: CancellationToken,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new load, superseding whatever was in flight
    pub fn begin(&self) -> LoadTicket {
        let fresh = CancellationToken::new();
        let previous = {
            let mut token = self.inner.token.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *token, fresh.clone())
        };
        previous.cancel();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        LoadTicket {
            generation,
            token: fresh,
        }
    }

    /// Whether `ticket` still belongs to the newest load
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        !ticket.is_cancelled() && self.inner.generation.load(Ordering::SeqCst) == ticket.generation
    }

    /// Cancel the in-flight load without starting another
    pub fn cancel(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}
