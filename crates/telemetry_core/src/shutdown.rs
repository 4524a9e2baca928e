//! Sinal de cancelamento cooperativo compartilhado por todos os loops.
//!
//! Os loops esperam com [`ShutdownSignal::wait_timeout`] em vez de
//! `thread::sleep`, então acordam assim que o sinal é disparado.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispara o sinal. Idempotente.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *triggered = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dorme até `timeout` ou até o sinal disparar.
    /// Retorna `true` se o sinal foi disparado.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut triggered = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = cvar
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
