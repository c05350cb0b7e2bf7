/// Monotonically increasing handle allocator.
///
/// Handles are never handed out twice by the same factory, so a handle stays unique for the
/// lifetime of whatever owns the factory.
#[derive(Debug)]
#[must_use]
pub struct HandleFactory {
    next: u64,
}

impl HandleFactory {
    /// Create a factory whose first allocation returns `start`.
    pub fn new(start: u64) -> Self {
        Self { next: start }
    }

    /// Allocate the next handle.
    pub fn allocate(&mut self) -> u64 {
        let handle = self.next;
        self.next += 1;
        handle
    }
}
