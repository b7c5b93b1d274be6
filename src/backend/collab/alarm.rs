//! In-process half of a durable alarm.
//!
//! The persisted schedule row says *when* a document wants to wake up; the
//! [`AlarmClock`] turns that into a sleeping timer task. Re-arming aborts
//! the previous timer and bumps a generation counter, so a wake-up that was
//! already in flight when the alarm changed is recognised as stale and
//! ignored.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::backend::persistence::AlarmKind;

#[derive(Debug)]
struct Armed {
    kind: AlarmKind,
    at: DateTime<Utc>,
    generation: u64,
    timer: JoinHandle<()>,
}

impl Drop for Armed {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[derive(Debug, Default)]
pub struct AlarmClock {
    generation: u64,
    armed: Option<Armed>,
}

impl AlarmClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any armed alarm; `on_fire` receives the generation to report
    pub fn arm<F>(&mut self, kind: AlarmKind, at: DateTime<Utc>, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.generation += 1;
        let generation = self.generation;
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        });

        // Dropping the previous alarm aborts its timer
        self.armed = Some(Armed {
            kind,
            at,
            generation,
            timer,
        });
    }

    /// Consume the alarm if `generation` is current; stale wake-ups yield `None`
    pub fn fire(&mut self, generation: u64) -> Option<AlarmKind> {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                let kind = armed.kind;
                self.armed = None;
                Some(kind)
            }
            _ => None,
        }
    }

    pub fn armed(&self) -> Option<(AlarmKind, DateTime<Utc>)> {
        self.armed.as_ref().map(|armed| (armed.kind, armed.at))
    }

    /// Wake time for a polling request: never later than what is already armed
    pub fn polling_target(&self, requested: DateTime<Utc>) -> DateTime<Utc> {
        match &self.armed {
            Some(armed) => armed.at.min(requested),
            None => requested,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }
}
