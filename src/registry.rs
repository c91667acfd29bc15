//! Invitation registry: the single source of truth for the one-active-call
//! invariant and for event deduplication.
//!
//! The socket and push paths may run concurrently (push delivery arrives on
//! an OS-level callback), so the registry is the only locked boundary. Both
//! adapters call the read-only [`precheck`](InvitationRegistry::precheck)
//! before handing events off; the mutating
//! [`observe`](InvitationRegistry::observe) is called exclusively from the
//! engine's single-threaded consumer, which is what makes first-arrival-wins
//! dedup sound without further locking.

use log::debug;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::types::call::{CallId, CallInvitation};
use crate::types::events::EventKind;

/// Verdict for one observed `(call_id, kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this pair was seen; process it.
    Fresh,
    /// Same pair already delivered by the other (or same) channel; drop it.
    Duplicate,
    /// Event for a call id that is not the active call; drop it.
    Stale,
    /// An offer for a second call while one is active; auto-decline it.
    Busy,
}

struct ActiveCall {
    invitation: CallInvitation,
    seen: HashSet<EventKind>,
}

#[derive(Default)]
pub struct InvitationRegistry {
    active: Mutex<Option<ActiveCall>>,
}

impl InvitationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call attempt if no other is active. Returns false when a
    /// call (this one or another) already holds the active slot.
    pub fn register_if_absent(&self, invitation: &CallInvitation) -> bool {
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return false;
        }
        let mut seen = HashSet::new();
        // An incoming registration is only ever triggered by an offer, so
        // the offer itself counts as delivered.
        seen.insert(EventKind::Incoming);
        *active = Some(ActiveCall {
            invitation: invitation.clone(),
            seen,
        });
        true
    }

    /// The invitation currently holding the active slot, if any.
    pub fn current(&self) -> Option<CallInvitation> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| a.invitation.clone())
    }

    /// Evict the active call. A no-op if a different call id holds the slot.
    pub fn clear(&self, call_id: &CallId) {
        let mut active = self.active.lock().unwrap();
        if active
            .as_ref()
            .is_some_and(|a| a.invitation.call_id == *call_id)
        {
            *active = None;
        }
    }

    /// Read-only guard used by the adapters before enqueuing. Never mutates;
    /// a `true` verdict here can still be overturned by [`observe`] once the
    /// engine processes the event.
    pub fn precheck(&self, call_id: &CallId, kind: EventKind) -> bool {
        let active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(a) if a.invitation.call_id == *call_id => !a.seen.contains(&kind),
            // Offers for another call pass through so the engine can send
            // the busy decline; everything else for an unknown call is
            // stale.
            Some(_) | None => kind == EventKind::Incoming,
        }
    }

    /// Authoritative dedup check, called only from the engine's consumer.
    /// Records the `(call_id, kind)` pair so the second delivery of the same
    /// event is reported as a duplicate.
    pub fn observe(&self, call_id: &CallId, kind: EventKind) -> Admission {
        let mut active = self.active.lock().unwrap();
        match active.as_mut() {
            Some(a) if a.invitation.call_id == *call_id => {
                // Negotiation payloads repeat legitimately; only lifecycle
                // kinds participate in first-arrival dedup.
                if kind == EventKind::Signaling {
                    return Admission::Fresh;
                }
                if a.seen.insert(kind) {
                    Admission::Fresh
                } else {
                    debug!(
                        target: "Calls/Registry",
                        "Duplicate {:?} for call {}", kind, call_id
                    );
                    Admission::Duplicate
                }
            }
            Some(_) => {
                if kind == EventKind::Incoming {
                    Admission::Busy
                } else {
                    Admission::Stale
                }
            }
            None => {
                if kind == EventKind::Incoming {
                    Admission::Fresh
                } else {
                    Admission::Stale
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::call::{CallType, UserId};
    use std::sync::Arc;

    fn invitation(id: &str) -> CallInvitation {
        CallInvitation::new(
            CallId::new(id),
            UserId::new("u-1"),
            UserId::new("u-2"),
            CallType::Audio,
            None,
            None,
        )
    }

    #[test]
    fn test_at_most_one_active_call() {
        let registry = InvitationRegistry::new();
        assert!(registry.register_if_absent(&invitation("C1")));
        assert!(!registry.register_if_absent(&invitation("C2")));
        assert!(!registry.register_if_absent(&invitation("C1")));
        assert_eq!(registry.current().unwrap().call_id.as_str(), "C1");

        registry.clear(&CallId::new("C1"));
        assert!(registry.current().is_none());
        assert!(registry.register_if_absent(&invitation("C2")));
    }

    #[test]
    fn test_clear_ignores_other_call_ids() {
        let registry = InvitationRegistry::new();
        registry.register_if_absent(&invitation("C1"));
        registry.clear(&CallId::new("C2"));
        assert!(registry.current().is_some());
    }

    #[test]
    fn test_duplicate_offer_is_suppressed() {
        let registry = InvitationRegistry::new();
        let c1 = CallId::new("C1");

        // First offer (socket) registers the call.
        assert_eq!(registry.observe(&c1, EventKind::Incoming), Admission::Fresh);
        registry.register_if_absent(&invitation("C1"));

        // The push copy of the same offer is a duplicate.
        assert_eq!(
            registry.observe(&c1, EventKind::Incoming),
            Admission::Duplicate
        );

        // A fresh kind for the same call is admitted exactly once.
        assert_eq!(registry.observe(&c1, EventKind::Ended), Admission::Fresh);
        assert_eq!(
            registry.observe(&c1, EventKind::Ended),
            Admission::Duplicate
        );
    }

    #[test]
    fn test_second_offer_is_busy_other_events_stale() {
        let registry = InvitationRegistry::new();
        registry.register_if_absent(&invitation("C1"));

        assert_eq!(
            registry.observe(&CallId::new("C2"), EventKind::Incoming),
            Admission::Busy
        );
        assert_eq!(
            registry.observe(&CallId::new("C2"), EventKind::Accepted),
            Admission::Stale
        );
    }

    #[test]
    fn test_signaling_payloads_are_not_deduped() {
        let registry = InvitationRegistry::new();
        let c1 = CallId::new("C1");
        registry.register_if_absent(&invitation("C1"));

        assert_eq!(registry.observe(&c1, EventKind::Signaling), Admission::Fresh);
        assert_eq!(registry.observe(&c1, EventKind::Signaling), Admission::Fresh);

        // Signaling for a call that is not active is still stale.
        assert_eq!(
            registry.observe(&CallId::new("C2"), EventKind::Signaling),
            Admission::Stale
        );
    }

    #[test]
    fn test_events_after_clear_are_stale() {
        let registry = InvitationRegistry::new();
        let c1 = CallId::new("C1");
        registry.register_if_absent(&invitation("C1"));
        registry.clear(&c1);

        // A late timer or push delivery for the ended call is dropped.
        assert_eq!(registry.observe(&c1, EventKind::Timeout), Admission::Stale);
        assert_eq!(registry.observe(&c1, EventKind::Ended), Admission::Stale);
    }

    #[test]
    fn test_precheck_is_read_only() {
        let registry = InvitationRegistry::new();
        let c1 = CallId::new("C1");

        assert!(registry.precheck(&c1, EventKind::Incoming));
        assert!(registry.precheck(&c1, EventKind::Incoming));
        // Precheck never recorded anything, so observe still admits.
        assert_eq!(registry.observe(&c1, EventKind::Incoming), Admission::Fresh);

        registry.register_if_absent(&invitation("C1"));
        assert!(!registry.precheck(&c1, EventKind::Incoming));
        assert!(registry.precheck(&c1, EventKind::Accepted));
        assert!(!registry.precheck(&CallId::new("C2"), EventKind::Accepted));
        assert!(registry.precheck(&CallId::new("C2"), EventKind::Incoming));
    }

    /// The registry is shared between the socket path, the push callback,
    /// and the engine; registration must stay exclusive under contention.
    #[test]
    fn test_concurrent_registration_admits_exactly_one() {
        let registry = Arc::new(InvitationRegistry::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                registry.register_if_absent(&invitation(&format!("C{}", i)))
            }));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|registered| *registered)
            .count();
        assert_eq!(admitted, 1);
        assert!(registry.current().is_some());
    }
}
