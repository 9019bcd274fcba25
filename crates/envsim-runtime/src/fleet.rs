//! Fleet Coordinator.
//!
//! A [`Fleet`] owns `sensors_per_kind` sensors of every [`SensorKind`], built
//! in [`SensorKind::ALL`] order with ids drawn from the shared
//! [`IdAllocator`].  Collective operations fan out to every sensor
//! concurrently; one sensor failing never prevents the others from
//! proceeding.

use std::sync::Arc;

use envsim_hal::{Sensor, SensorState};
use envsim_middleware::BrokerTransport;
use envsim_types::{SensorIdentity, SensorKind, SimError, SleepBounds};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::ids::IdAllocator;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub sensors_per_kind: usize,
    pub sleep_bounds: SleepBounds,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            sensors_per_kind: 1,
            sleep_bounds: SleepBounds::default(),
        }
    }
}

#[derive(Debug)]
pub struct Fleet {
    sensors: Vec<Sensor>,
}

impl Fleet {
    /// Build the fleet.  `transport_for` is called once per sensor and must
    /// return a transport dedicated to it.
    pub fn build<F>(config: &FleetConfig, ids: &IdAllocator, mut transport_for: F) -> Self
    where
        F: FnMut(&SensorIdentity) -> Arc<dyn BrokerTransport>,
    {
        let mut sensors = Vec::with_capacity(SensorKind::ALL.len() * config.sensors_per_kind);
        for kind in SensorKind::ALL {
            for _ in 0..config.sensors_per_kind {
                let identity = SensorIdentity::new(ids.allocate(), kind);
                let transport = transport_for(&identity);
                sensors.push(Sensor::new(identity, transport, config.sleep_bounds));
            }
        }
        info!(sensors = sensors.len(), "fleet built");
        Self { sensors }
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn get(&self, id: u64) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Number of sensors currently in `state`.
    pub fn count_in(&self, state: SensorState) -> usize {
        self.sensors.iter().filter(|s| s.state() == state).count()
    }

    /// Connect every sensor.  Returns how many connected; failures are
    /// logged by the sensors themselves.
    pub async fn connect_all(&self) -> usize {
        let results = join_all(self.sensors.iter().map(Sensor::connect)).await;
        let connected = results.iter().filter(|r| r.is_ok()).count();
        if connected < self.sensors.len() {
            warn!(
                connected,
                total = self.sensors.len(),
                "some sensors could not reach the broker"
            );
        }
        connected
    }

    /// Start every sensor.  Returns how many are running afterwards.
    pub async fn start_all(&self) -> usize {
        let results: Vec<Result<(), SimError>> =
            join_all(self.sensors.iter().map(Sensor::start)).await;
        results.iter().filter(|r| r.is_ok()).count()
    }

    pub async fn stop_all(&self) {
        join_all(self.sensors.iter().map(Sensor::stop)).await;
    }

    /// Tear every sensor down.  The fleet cannot be restarted afterwards.
    pub async fn shutdown(&self) {
        join_all(self.sensors.iter().map(Sensor::shutdown)).await;
        info!(sensors = self.sensors.len(), "fleet shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsim_middleware::MemoryBroker;
    use envsim_types::CONTROL_TOPIC;
    use std::collections::HashSet;
    use std::time::Duration;

    fn fast_config(per_kind: usize) -> FleetConfig {
        FleetConfig {
            sensors_per_kind: per_kind,
            sleep_bounds: SleepBounds::new(Duration::from_millis(5), Duration::from_millis(15))
                .unwrap(),
        }
    }

    fn memory_fleet(broker: &MemoryBroker, ids: &IdAllocator, per_kind: usize) -> Fleet {
        Fleet::build(&fast_config(per_kind), ids, |_| Arc::new(broker.transport()))
    }

    async fn eventually(fleet: &Fleet, state: SensorState, count: usize) -> bool {
        for _ in 0..200 {
            if fleet.count_in(state) == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn build_creates_n_sensors_per_kind_in_order() {
        let broker = MemoryBroker::default();
        let ids = IdAllocator::new();
        let fleet = memory_fleet(&broker, &ids, 2);

        assert_eq!(fleet.len(), 8);
        let kinds: Vec<_> = fleet.sensors().iter().map(Sensor::kind).collect();
        assert_eq!(kinds[0], SensorKind::Temperature);
        assert_eq!(kinds[1], SensorKind::Temperature);
        assert_eq!(kinds[7], SensorKind::DissolvedOxygen);
        assert_eq!(fleet.count_in(SensorState::Idle), 8);
    }

    #[test]
    fn ids_are_unique_across_fleets_sharing_an_allocator() {
        let broker = MemoryBroker::default();
        let ids = IdAllocator::new();
        let a = memory_fleet(&broker, &ids, 1);
        let b = memory_fleet(&broker, &ids, 1);

        let all: HashSet<u64> = a.sensors().iter().chain(b.sensors()).map(Sensor::id).collect();
        assert_eq!(all.len(), 8);
        assert!(a.get(1).is_some());
        assert!(b.get(1).is_none());
        assert_eq!(b.get(5).map(Sensor::kind), Some(SensorKind::Temperature));
    }

    #[test]
    fn empty_fleet() {
        let broker = MemoryBroker::default();
        let fleet = memory_fleet(&broker, &IdAllocator::new(), 0);
        assert!(fleet.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let broker = MemoryBroker::default();
        let fleet = memory_fleet(&broker, &IdAllocator::new(), 1);

        assert_eq!(fleet.connect_all().await, 4);
        assert_eq!(fleet.count_in(SensorState::ConnectedIdle), 4);

        assert_eq!(fleet.start_all().await, 4);
        assert_eq!(fleet.count_in(SensorState::Running), 4);

        fleet.stop_all().await;
        assert_eq!(fleet.count_in(SensorState::ConnectedIdle), 4);

        fleet.shutdown().await;
        assert_eq!(fleet.count_in(SensorState::Stopped), 4);
    }

    #[tokio::test]
    async fn connect_all_reports_failures() {
        let broker = MemoryBroker::default();
        broker.set_available(false);
        let fleet = memory_fleet(&broker, &IdAllocator::new(), 1);
        assert_eq!(fleet.connect_all().await, 0);
        assert_eq!(fleet.count_in(SensorState::Idle), 4);
    }

    #[tokio::test]
    async fn control_topic_drives_the_whole_fleet() {
        let broker = MemoryBroker::default();
        let fleet = memory_fleet(&broker, &IdAllocator::new(), 1);
        fleet.connect_all().await;

        broker.inject(CONTROL_TOPIC, br#"{"command":"start_all"}"#.to_vec());
        assert!(eventually(&fleet, SensorState::Running, 4).await);

        broker.inject(CONTROL_TOPIC, br#"{"command":"stop","sensorId":2}"#.to_vec());
        assert!(eventually(&fleet, SensorState::Running, 3).await);
        assert_eq!(fleet.get(2).map(Sensor::state), Some(SensorState::ConnectedIdle));

        broker.inject(CONTROL_TOPIC, br#"{"command":"stop_all"}"#.to_vec());
        assert!(eventually(&fleet, SensorState::ConnectedIdle, 4).await);

        fleet.shutdown().await;
    }
}
