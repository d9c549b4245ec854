//! Free-list pool of reusable assemblers.
//!
//! `acquire` never blocks: an empty free list allocates a new instance. The
//! returned guard resets the instance and puts it back when dropped, so every
//! exit path of a task (success, error, panic unwinding) releases it.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::generator::Assembler;

/// Pool of reset-on-release assemblers.
pub struct AssemblerPool<A: Assembler> {
    free: Mutex<Vec<A>>,
    created: AtomicUsize,
}

impl<A: Assembler> Default for AssemblerPool<A> {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }
}

impl<A: Assembler> AssemblerPool<A> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Takes an idle instance, or creates one when none is idle.
    pub fn acquire(self: &Arc<Self>) -> PooledAssembler<A> {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let assembler = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            A::create()
        });

        PooledAssembler {
            assembler: Some(assembler),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut assembler: A) {
        assembler.reset();
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(assembler);
    }

    /// Instances constructed over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Instances currently idle.
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Exclusive handle to a pooled assembler; returns it to the pool on drop.
pub struct PooledAssembler<A: Assembler> {
    assembler: Option<A>,
    pool: Arc<AssemblerPool<A>>,
}

impl<A: Assembler> Deref for PooledAssembler<A> {
    type Target = A;

    fn deref(&self) -> &A {
        // Only `drop` takes the instance out.
        self.assembler.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<A: Assembler> DerefMut for PooledAssembler<A> {
    fn deref_mut(&mut self) -> &mut A {
        self.assembler.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<A: Assembler> Drop for PooledAssembler<A> {
    fn drop(&mut self) {
        if let Some(assembler) = self.assembler.take() {
            self.pool.release(assembler);
        }
    }
}
