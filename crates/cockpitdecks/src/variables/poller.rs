use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::{FetchHintSink, VariableStore};
use crate::simulator::Simulator;

/// Reads variables from the simulator at the cadence requested for them.
///
/// Register it as the store's [`FetchHintSink`], then run [`VariablePoller::run`]
/// on the runtime. Each variable is read when its period has elapsed; variables
/// without a hint are left to whatever pushes values into the store.
pub struct VariablePoller {
    store: Arc<VariableStore>,
    simulator: Arc<dyn Simulator>,
    schedule: DashMap<String, (Duration, Option<Instant>)>,
    resolution: Duration,
}

impl VariablePoller {
    /// A poller waking up every `resolution` to look for due variables
    pub fn new(
        store: Arc<VariableStore>,
        simulator: Arc<dyn Simulator>,
        resolution: Duration,
    ) -> Arc<Self> {
        let poller = Arc::new(Self {
            store: store.clone(),
            simulator,
            schedule: DashMap::new(),
            resolution,
        });
        for (name, period) in store.fetch_schedule() {
            poller.schedule.insert(name, (period, None));
        }
        let sink: Arc<dyn FetchHintSink> = poller.clone();
        store.set_fetch_hint_sink(&sink);
        poller
    }

    /// Names due for a read at `now`, marking them as read
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for mut entry in self.schedule.iter_mut() {
            let (period, last) = *entry.value();
            if last.is_none_or(|last| now.duration_since(last) >= period) {
                entry.value_mut().1 = Some(now);
                due.push(entry.key().clone());
            }
        }
        due
    }

    /// Read every due variable once
    pub async fn poll_once(&self) {
        for name in self.due(Instant::now()) {
            match self.simulator.read(&name).await {
                Ok(value) => {
                    self.store.set(&name, value);
                }
                Err(err) => debug!("Could not read {}: {}", name, err),
            }
        }
    }

    /// Poll forever; cancel by aborting the task running it
    pub async fn run(self: Arc<Self>) {
        loop {
            self.poll_once().await;
            trace!("Poller sleeping {:?}", self.resolution);
            async_std::task::sleep(self.resolution).await;
        }
    }
}

impl FetchHintSink for VariablePoller {
    fn fetch_period(&self, name: &str, period: Duration) {
        self.schedule
            .entry(name.to_string())
            .and_modify(|entry| entry.0 = period)
            .or_insert((period, None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::RecordingSimulator;
    use crate::variables::Value;

    #[test]
    fn variables_become_due_after_their_period() {
        let store = Arc::new(VariableStore::new());
        store.request_fetch_period("sim/a", Duration::from_millis(100));
        let poller = VariablePoller::new(
            store.clone(),
            Arc::new(RecordingSimulator::default()),
            Duration::from_millis(10),
        );
        store.request_fetch_period("sim/b", Duration::from_secs(1));

        let start = Instant::now();
        let mut first = poller.due(start);
        first.sort();
        assert_eq!(first, vec!["sim/a".to_string(), "sim/b".to_string()]);
        assert!(poller.due(start + Duration::from_millis(50)).is_empty());
        assert_eq!(
            poller.due(start + Duration::from_millis(150)),
            vec!["sim/a".to_string()]
        );
    }

    #[test]
    fn poll_once_copies_simulator_values_into_the_store() {
        let store = Arc::new(VariableStore::new());
        let simulator = Arc::new(RecordingSimulator::default());
        simulator.set_value("sim/qnh", Value::Number(1013.25));
        store.request_fetch_period("sim/qnh", Duration::from_secs(1));
        let poller = VariablePoller::new(store.clone(), simulator, Duration::from_millis(10));

        futures_lite::future::block_on(poller.poll_once());
        assert_eq!(store.get("sim/qnh"), Value::Number(1013.25));
    }

    #[test]
    fn a_dropped_poller_is_freed_and_stops_getting_hints() {
        let store = Arc::new(VariableStore::new());
        let simulator = Arc::new(RecordingSimulator::default());
        let first = VariablePoller::new(store.clone(), simulator.clone(), Duration::from_millis(10));
        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_none());

        let second = VariablePoller::new(store.clone(), simulator, Duration::from_millis(10));
        store.request_fetch_period("sim/oat", Duration::from_secs(2));
        assert_eq!(second.due(Instant::now()), vec!["sim/oat".to_string()]);
    }
}
