use std::time::Instant;

/// Monotonic millisecond counter.
///
/// The value is 32 bits wide and wraps after roughly 49.7 days, the same as
/// the board's tick counter, so callers must tolerate wraparound.
pub trait Clock {
    fn millis(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn millis(&self) -> u32 {
        (**self).millis()
    }
}

/// Clock backed by `std::time::Instant`, counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        // Truncation is the wraparound
        self.start.elapsed().as_millis() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn system_clock_starts_near_zero() {
        let clock = SystemClock::new();
        assert!(clock.millis() < 1_000);
    }

    #[test]
    fn system_clock_advances_across_sleep() {
        let clock = SystemClock::new();
        let before = clock.millis();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.millis() >= before + 5);
    }
}
