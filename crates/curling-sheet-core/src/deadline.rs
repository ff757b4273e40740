use std::time::{Duration, Instant};

/// Wall-clock limit shared by the stages working on one image.
///
/// Long loops poll [`Deadline::expired`] and stop early; the caller is
/// expected to discard whatever a stage returns after the deadline passed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn never() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// `budget` from `start`; `None` never expires.
    pub fn from_budget(start: Instant, budget: Option<Duration>) -> Self {
        Self {
            at: budget.and_then(|b| start.checked_add(b)),
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|t| Instant::now() >= t)
    }
}
