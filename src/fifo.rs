//! Fixed capacity payload FIFO
//!
//! Slots are allocated once and indexed by position; pushing copies into the slot at `back`,
//! popping copies out of the slot at `front`. Nothing is allocated after construction, so the
//! queue can be used from interrupt context.

use crate::Error;
use crate::payload::Payload;

pub struct PayloadQueue<const N: usize, const P: usize> {
    slots: [Payload<P>; N],
    /// Index of the oldest entry
    front: usize,
    /// Index of the next free slot
    back: usize,
    count: usize,
}

impl<const N: usize, const P: usize> PayloadQueue<N, P> {
    pub const fn new() -> Self {
        const {
            assert!(N >= 1, "queue capacity must be at least 1");
        }
        Self {
            slots: [const { Payload::empty() }; N],
            front: 0,
            back: 0,
            count: 0,
        }
    }

    #[inline]
    fn wrap(index: usize) -> usize {
        if index >= N { index - N } else { index }
    }

    /// Appends a copy of `payload`. Fails with [`Error::QueueFull`] rather than overwriting.
    pub fn push(&mut self, payload: &Payload<P>) -> Result<(), Error> {
        self.push_with(|slot| {
            slot.clone_from(payload);
            Ok(())
        })
    }

    /// Appends an entry filled in place by `fill`. Nothing is committed if `fill` fails.
    pub fn push_with<F>(&mut self, fill: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Payload<P>) -> Result<(), Error>,
    {
        if self.is_full() {
            return Err(Error::QueueFull);
        }
        fill(&mut self.slots[self.back])?;
        self.back = Self::wrap(self.back + 1);
        self.count += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Payload<P>> {
        if self.is_empty() {
            return None;
        }
        let payload = self.slots[self.front].clone();
        self.front = Self::wrap(self.front + 1);
        self.count -= 1;
        Some(payload)
    }

    /// Drops the oldest entry without copying it out.
    pub fn discard_front(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.front = Self::wrap(self.front + 1);
        self.count -= 1;
        true
    }

    pub fn peek_front(&self) -> Option<&Payload<P>> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.front])
        }
    }

    /// Oldest entry addressed to `pipe`.
    pub fn peek_pipe(&self, pipe: u8) -> Option<&Payload<P>> {
        self.iter().find(|p| p.pipe == pipe)
    }

    /// Removes the oldest entry addressed to `pipe`, keeping the order of the others.
    pub fn remove_pipe(&mut self, pipe: u8) -> Option<Payload<P>> {
        let offset = self.iter().position(|p| p.pipe == pipe)?;

        // Bubble the entry to the back, shifting the younger entries one slot forward.
        for i in offset..self.count - 1 {
            let a = Self::wrap(self.front + i);
            let b = Self::wrap(self.front + i + 1);
            self.slots.swap(a, b);
        }
        let last = Self::wrap(self.front + self.count - 1);
        self.back = last;
        self.count -= 1;
        Some(self.slots[last].clone())
    }

    pub fn clear(&mut self) {
        self.front = 0;
        self.back = 0;
        self.count = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Payload<P>> {
        (0..self.count).map(move |i| &self.slots[Self::wrap(self.front + i)])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == N
    }
}

impl<const N: usize, const P: usize> Default for PayloadQueue<N, P> {
    fn default() -> Self {
        Self::new()
    }
}
