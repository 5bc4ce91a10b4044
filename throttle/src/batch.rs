/// Units reserved for one directory's dispatch.
///
/// Units not lent out are returned to the governor when the batch is dropped.
#[derive(Debug)]
pub struct Batch {
    sem: std::sync::Arc<tokio::sync::Semaphore>,
    reserved: usize,
}

impl Batch {
    pub(crate) fn new(sem: std::sync::Arc<tokio::sync::Semaphore>, reserved: usize) -> Self {
        Self { sem, reserved }
    }

    pub(crate) fn empty(sem: std::sync::Arc<tokio::sync::Semaphore>) -> Self {
        Self::new(sem, 0)
    }

    /// Lends one reserved unit to a task, `None` once all units are out.
    pub fn take(&mut self) -> Option<Slot> {
        if self.reserved == 0 {
            return None;
        }
        self.reserved -= 1;
        Some(Slot::new(self.sem.clone()))
    }

    /// Takes a unit back from a finished task so another entry can use it.
    pub fn restore(&mut self, mut slot: Slot) {
        if slot.sem.take().is_some() {
            self.reserved += 1;
        }
    }

    /// Number of reserved units not currently lent out.
    pub fn available(&self) -> usize {
        self.reserved
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.reserved > 0 {
            self.sem.add_permits(self.reserved);
        }
    }
}

/// One unit of work; released when dropped.
#[derive(Debug)]
pub struct Slot {
    sem: Option<std::sync::Arc<tokio::sync::Semaphore>>,
}

impl Slot {
    pub(crate) fn new(sem: std::sync::Arc<tokio::sync::Semaphore>) -> Self {
        Self { sem: Some(sem) }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(sem) = self.sem.take() {
            sem.add_permits(1);
        }
    }
}
