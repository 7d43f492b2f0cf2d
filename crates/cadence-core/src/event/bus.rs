//! Kernel event fan-out.
//!
//! The engine, pool and classifier publish [`KernelEvent`]s on a shared
//! broadcast channel. Front ends either take every event with
//! [`EventBus::subscribe`] or follow a single run with
//! [`EventBus::follow_run`], which drops other runs' events and rides over
//! lag. Events without a run (agent invocations, critical failures) are
//! passed to run followers too, since they come from the run's own work or
//! concern every operator.

use cadence_types::event::KernelEvent;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<KernelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.sender.subscribe()
    }

    /// Events of one run, plus run-less events.
    pub fn follow_run(&self, run_id: Uuid) -> RunEvents {
        RunEvents {
            run_id,
            receiver: self.sender.subscribe(),
            missed: 0,
        }
    }

    /// Fire and forget; dropped when nobody listens.
    pub fn publish(&self, event: KernelEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("kernel event dropped, no subscribers");
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// A subscription filtered to one run.
#[derive(Debug)]
pub struct RunEvents {
    run_id: Uuid,
    receiver: broadcast::Receiver<KernelEvent>,
    missed: u64,
}

impl RunEvents {
    fn wanted(&self, event: &KernelEvent) -> bool {
        event.run_id().is_none_or(|id| id == self.run_id)
    }

    /// Next matching event; `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<KernelEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wanted(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => self.missed += n,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_next(&mut self) -> Option<KernelEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.wanted(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(n)) => self.missed += n,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events lost because this follower fell behind the channel capacity.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_completed(run_id: Uuid) -> KernelEvent {
        KernelEvent::StepCompleted {
            run_id,
            step_index: 0,
            next_step: 1,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();

        bus.publish(step_completed(Uuid::now_v7()));

        assert!(matches!(first.recv().await.unwrap(), KernelEvent::StepCompleted { .. }));
        assert!(matches!(second.recv().await.unwrap(), KernelEvent::StepCompleted { .. }));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(step_completed(Uuid::now_v7()));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn followers_only_see_their_run() {
        let bus = EventBus::new(16);
        let mine = Uuid::now_v7();
        let mut follower = bus.follow_run(mine);

        bus.publish(step_completed(Uuid::now_v7()));
        bus.publish(KernelEvent::AgentInvoked {
            task_id: Uuid::now_v7(),
            agent: "analyst".into(),
            model: "claude/claude-sonnet-4".into(),
            duration_ms: 10,
            estimated_cost_usd: 0.0,
            success: true,
        });
        bus.publish(step_completed(mine));

        assert!(matches!(follower.next().await, Some(KernelEvent::AgentInvoked { .. })));
        assert!(matches!(
            follower.next().await,
            Some(KernelEvent::StepCompleted { run_id, .. }) if run_id == mine
        ));
        assert!(follower.try_next().is_none());
    }

    #[test]
    fn lagging_followers_count_missed_events() {
        let bus = EventBus::new(2);
        let run_id = Uuid::now_v7();
        let mut follower = bus.follow_run(run_id);

        for _ in 0..5 {
            bus.publish(step_completed(run_id));
        }

        let mut seen = 0;
        while follower.try_next().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 2);
        assert_eq!(follower.missed(), 3);
    }
}
