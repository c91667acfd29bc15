//! Engine configuration.

use std::time::Duration;

/// Tunables for the call engine and its supervisor.
///
/// The defaults mirror the backend contract: a human has roughly 30 seconds
/// to respond before a call attempt rings out.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long the caller waits for the callee before ringing out.
    pub ring_timeout: Duration,
    /// How long the callee's device rings before auto-declining.
    pub answer_timeout: Duration,
    /// How long media setup may take after an accept before the call is
    /// abandoned.
    pub connect_timeout: Duration,
    /// Bounded reconnection attempts while a call is active.
    pub reconnect_max_attempts: u32,
    /// Delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Upper bound on one outbound send, independent of the response timers
    /// so a hung send cannot mask a ring-timeout.
    pub send_timeout: Duration,
    /// Capacity of the single engine input queue.
    pub queue_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(30),
            answer_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            reconnect_max_attempts: 3,
            reconnect_delay: Duration::from_secs(3),
            send_timeout: Duration::from_secs(10),
            queue_capacity: 64,
        }
    }
}
