use metrics::{counter, gauge};

use super::{Hook, Name};
use crate::lifecycle::LifecycleState;

/// Records that a service moved to `state`.
///
/// Emits a `service.transitions` counter, labelled by service name and the new state, and updates the `service.state`
/// gauge with the position of the new state in the lifecycle.
pub(crate) fn record_transition(service: &Name, state: LifecycleState) {
    counter!("service.transitions", "service_name" => service.to_string(), "state" => state.as_str()).increment(1);
    gauge!("service.state", "service_name" => service.to_string()).set(state.ordinal() as f64);
}

/// Records that a teardown hook was aborted for exceeding the shutdown timeout.
pub(crate) fn record_hook_timeout(service: &Name, hook: Hook) {
    counter!("service.hook_timeouts", "service_name" => service.to_string(), "hook" => hook.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use metrics::{SharedString, Unit};
    use metrics_util::{
        debugging::{DebugValue, DebuggingRecorder},
        CompositeKey, MetricKind,
    };

    use super::*;

    type Snapshot = Vec<(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)>;

    fn get_value<'a>(snapshot: &'a Snapshot, kind: MetricKind, name: &str, labels: &[(&str, &str)]) -> &'a DebugValue {
        snapshot
            .iter()
            .find(|(key, _, _, _)| {
                key.kind() == kind
                    && key.key().name() == name
                    && labels.iter().all(|(label_key, label_value)| {
                        key.key()
                            .labels()
                            .any(|label| label.key() == *label_key && label.value() == *label_value)
                    })
            })
            .map(|(_, _, _, value)| value)
            .unwrap_or_else(|| panic!("no metric found with name {} and labels {:?}", name, labels))
    }

    #[test]
    fn transitions_update_counter_and_gauge() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let name = Name::root("ingest").unwrap();

        metrics::with_local_recorder(&recorder, || {
            record_transition(&name, LifecycleState::Starting);
            record_transition(&name, LifecycleState::Running);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let running = get_value(
            &snapshot,
            MetricKind::Counter,
            "service.transitions",
            &[("service_name", "ingest"), ("state", "running")],
        );
        assert!(matches!(running, DebugValue::Counter(1)));

        match get_value(&snapshot, MetricKind::Gauge, "service.state", &[("service_name", "ingest")]) {
            DebugValue::Gauge(value) => assert_eq!(value.into_inner(), 2.0),
            other => panic!("expected a gauge, got: {:?}", other),
        }
    }

    #[test]
    fn hook_timeouts_are_counted_per_hook() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let name = Name::root("ingest").unwrap();

        metrics::with_local_recorder(&recorder, || {
            record_hook_timeout(&name, Hook::Stop);
            record_hook_timeout(&name, Hook::Stop);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let timeouts = get_value(
            &snapshot,
            MetricKind::Counter,
            "service.hook_timeouts",
            &[("service_name", "ingest"), ("hook", "on_stop")],
        );
        assert!(matches!(timeouts, DebugValue::Counter(2)));
    }
}
