use std::time::Duration;
use tokio::time::Instant;

/// Debounced reload trigger. `request()` arms (or re-arms) a single
/// deadline one quiet window from now; bursts inside the window
/// collapse into the most recent deadline, so exactly one reload fires
/// per quiet period. Plain state owned by the orchestrator's control
/// task — when that task is dropped, any pending trigger dies with it.
#[derive(Debug)]
pub struct ReloadScheduler {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl ReloadScheduler {
    pub const DEFAULT_QUIET: Duration = Duration::from_secs(1);

    #[must_use]
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    /// Arms the trigger a full quiet window from now, replacing any
    /// pending deadline. Debouncing, not batching: there is never more
    /// than one pending trigger.
    pub fn request(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet);
    }

    /// Disarms a pending trigger, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Deadline for the owning select loop to sleep until.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarms and reports whether the pending trigger was due.
    pub fn fire_if_due(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for ReloadScheduler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUIET)
    }
}
