//! Registry behavior driven through the dispatcher and the timeout monitor.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use cms_control_point::{
    ControlPointConfig, DeviceDescription, EventDispatcher, Notification, Service, SubscriptionUpdate,
    TimeoutMonitor, TransportEvent, UpsertOutcome,
};
use common::{advertisement, description_xml, event_url, location, registry_with, RecordingTransport};

const TICK: Duration = Duration::from_secs(30);

fn search_result(udn: &str, expires: i64) -> TransportEvent {
    TransportEvent::SearchResult(advertisement(udn, expires))
}

#[test]
fn test_device_expires_after_lifetime_runs_out() {
    let transport = RecordingTransport::new();
    transport.serve("uuid:1", "B2BUA Edge");
    let (registry, rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));
    let monitor = TimeoutMonitor::new(Arc::clone(&registry), TICK);

    dispatcher.dispatch(search_result("uuid:1", 120)).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(transport.subscribe_count(), 1);

    let sweeps: Vec<_> = (0..4).map(|_| monitor.sweep()).collect();

    assert!(sweeps[0].expired.is_empty() && sweeps[0].renewals.is_empty());
    assert!(sweeps[1].expired.is_empty() && sweeps[1].renewals.is_empty());
    assert_eq!(sweeps[2].renewals, vec!["uuid:1".to_string()]);
    assert_eq!(sweeps[3].expired, vec!["uuid:1".to_string()]);

    assert!(registry.is_empty());
    assert_eq!(
        *transport.unsubscribes.lock().unwrap(),
        vec![(event_url("uuid:1"), "uuid:sub-1".to_string())]
    );
    assert!(transport
        .searches
        .lock()
        .unwrap()
        .contains(&("uuid:1".to_string(), 30)));

    let notifications: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        notifications,
        vec![
            Notification::DeviceAdded {
                udn: "uuid:1".into(),
                friendly_name: "B2BUA Edge".into()
            },
            Notification::DeviceRemoved { udn: "uuid:1".into() },
        ]
    );
}

#[test]
fn test_readvertisement_resets_lifetime_without_download() {
    let transport = RecordingTransport::new();
    transport.serve("uuid:1", "B2BUA Edge");
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));
    let monitor = TimeoutMonitor::new(Arc::clone(&registry), TICK);

    dispatcher.dispatch(search_result("uuid:1", 60)).unwrap();
    monitor.sweep();
    dispatcher
        .dispatch(TransportEvent::AdvertisementAlive(advertisement("uuid:1", 1800)))
        .unwrap();

    assert_eq!(registry.get(1).unwrap().lifetime, 1800);
    assert_eq!(transport.downloads.lock().unwrap().len(), 1);
    assert_eq!(transport.subscribe_count(), 1);
}

#[test]
fn test_renewal_boundaries() {
    let transport = RecordingTransport::new();
    for (udn, name) in [("uuid:a", "B2BUA A"), ("uuid:b", "B2BUA B"), ("uuid:c", "B2BUA C")] {
        transport.serve(udn, name);
    }
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));

    // After one tick: exactly 2 x tick left, just under it, and zero
    dispatcher.dispatch(search_result("uuid:a", 90)).unwrap();
    dispatcher.dispatch(search_result("uuid:b", 89)).unwrap();
    dispatcher.dispatch(search_result("uuid:c", 30)).unwrap();

    let report = TimeoutMonitor::new(Arc::clone(&registry), TICK).sweep();

    assert_eq!(report.renewals, vec!["uuid:b".to_string()]);
    assert_eq!(report.expired, vec!["uuid:c".to_string()]);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_adjacent_expiries_are_all_removed() {
    let transport = RecordingTransport::new();
    let udns = ["uuid:a", "uuid:b", "uuid:c", "uuid:d"];
    for udn in udns {
        transport.serve(udn, "B2BUA Node");
    }
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));

    for (udn, expires) in udns.into_iter().zip([30, 30, 600, 10]) {
        dispatcher.dispatch(search_result(udn, expires)).unwrap();
    }

    let report = TimeoutMonitor::new(Arc::clone(&registry), TICK).sweep();

    assert_eq!(report.expired, vec!["uuid:a", "uuid:b", "uuid:d"]);
    let remaining: Vec<_> = registry.list().into_iter().map(|d| d.udn).collect();
    assert_eq!(remaining, vec!["uuid:c"]);
    assert_eq!(transport.unsubscribe_count(), 3);
}

#[test]
fn test_filtered_device_is_never_subscribed() {
    let transport = RecordingTransport::new();
    transport.serve("uuid:1", "Media Renderer");
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));

    dispatcher.dispatch(search_result("uuid:1", 1800)).unwrap();

    assert!(registry.is_empty());
    assert_eq!(transport.subscribe_count(), 0);

    let relaxed = ControlPointConfig::any_device_name();
    let (registry, _rx) = registry_with(relaxed, Arc::clone(&transport));
    EventDispatcher::new(Arc::clone(&registry))
        .dispatch(search_result("uuid:1", 1800))
        .unwrap();
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_device_added_when_subscribe_fails() {
    let transport = RecordingTransport::new();
    transport.serve("uuid:1", "B2BUA Edge");
    transport.set_fail_subscribe(true);
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));

    EventDispatcher::new(Arc::clone(&registry))
        .dispatch(search_result("uuid:1", 1800))
        .unwrap();

    let device = registry.get(1).unwrap();
    let state = device.service(Service::ConfigurationManagement).unwrap();
    assert!(!state.is_subscribed());
    assert_eq!(state.event_url, event_url("uuid:1"));

    registry.remove("uuid:1").unwrap();
    assert_eq!(transport.unsubscribe_count(), 0);
}

#[test]
fn test_reassigned_sid_is_cleared_from_previous_holder() {
    let transport = RecordingTransport::new();
    transport.serve("uuid:a", "B2BUA A");
    transport.serve("uuid:b", "B2BUA B");
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));

    dispatcher.dispatch(search_result("uuid:a", 1800)).unwrap();
    dispatcher.dispatch(search_result("uuid:b", 1800)).unwrap();

    dispatcher
        .dispatch(TransportEvent::SubscribeComplete(SubscriptionUpdate {
            publisher_url: event_url("uuid:b"),
            sid: "uuid:sub-1".into(),
            timeout: 1801,
            outcome: Ok(()),
        }))
        .unwrap();

    let a = registry.get(1).unwrap();
    let b = registry.get(2).unwrap();
    assert_eq!(a.service(Service::ConfigurationManagement).unwrap().sid(), None);
    assert_eq!(b.service(Service::ConfigurationManagement).unwrap().sid(), Some("uuid:sub-1"));
}

#[test]
fn test_remove_all_unsubscribes_everything() {
    let transport = RecordingTransport::new();
    for udn in ["uuid:a", "uuid:b"] {
        transport.serve(udn, "B2BUA Node");
    }
    let (registry, rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));
    dispatcher.dispatch(search_result("uuid:a", 1800)).unwrap();
    dispatcher.dispatch(search_result("uuid:b", 1800)).unwrap();

    assert_eq!(registry.remove_all(), 2);
    assert!(registry.is_empty());
    assert_eq!(transport.unsubscribe_count(), 2);
    let removed = rx
        .try_iter()
        .filter(|n| matches!(n, Notification::DeviceRemoved { .. }))
        .count();
    assert_eq!(removed, 2);
}

#[test]
fn test_concurrent_upserts_register_one_device() {
    let transport = RecordingTransport::new();
    transport.set_subscribe_gate(Arc::new(Barrier::new(2)));
    let (registry, rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let description = Arc::new(DeviceDescription::parse(&description_xml("uuid:1", "B2BUA Edge")).unwrap());

    // Both upserts miss the lookup and subscribe before either inserts
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let description = Arc::clone(&description);
            thread::spawn(move || registry.upsert(&description, &location("uuid:1"), 1800))
        })
        .collect();
    let outcomes: Vec<UpsertOutcome> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let added = outcomes.iter().filter(|o| matches!(o, UpsertOutcome::Added(_))).count();
    let refreshed = outcomes.iter().filter(|o| matches!(o, UpsertOutcome::Refreshed(_))).count();
    assert_eq!((added, refreshed), (1, 1));
    assert_eq!(registry.len(), 1);
    assert_eq!(transport.subscribe_count(), 2);
    assert_eq!(transport.unsubscribe_count(), 1);

    let held = registry
        .get(1)
        .unwrap()
        .service(Service::ConfigurationManagement)
        .unwrap()
        .sid()
        .map(str::to_string)
        .unwrap();
    let (released_url, released) = transport.unsubscribes.lock().unwrap()[0].clone();
    assert_eq!(released_url, event_url("uuid:1"));
    assert_ne!(released, held);

    // A late completion for the released duplicate leaves the winner alone
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));
    dispatcher
        .dispatch(TransportEvent::SubscribeComplete(SubscriptionUpdate {
            publisher_url: event_url("uuid:1"),
            sid: released,
            timeout: 1801,
            outcome: Ok(()),
        }))
        .unwrap();
    let device = registry.get(1).unwrap();
    assert_eq!(device.service(Service::ConfigurationManagement).unwrap().sid(), Some(held.as_str()));

    let added_notifications = rx
        .try_iter()
        .filter(|n| matches!(n, Notification::DeviceAdded { .. }))
        .count();
    assert_eq!(added_notifications, 1);
}

#[test]
fn test_upsert_after_close_releases_subscriptions() {
    let transport = RecordingTransport::new();
    transport.serve("uuid:a", "B2BUA A");
    let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
    let dispatcher = EventDispatcher::new(Arc::clone(&registry));
    dispatcher.dispatch(search_result("uuid:a", 1800)).unwrap();

    assert_eq!(registry.close(), 1);
    assert!(registry.is_closed());

    let description = DeviceDescription::parse(&description_xml("uuid:b", "B2BUA B")).unwrap();
    assert_eq!(registry.upsert(&description, &location("uuid:b"), 1800), UpsertOutcome::Closed);
    assert!(registry.is_empty());
    assert_eq!(transport.subscribe_count(), 2);
    assert_eq!(transport.unsubscribe_count(), 2);
}

fn udn_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{1,3}".prop_map(|id| format!("uuid:{id}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However often a UDN is advertised, it is registered and subscribed once
    #[test]
    fn prop_udns_are_unique(udns in prop::collection::vec(udn_strategy(), 1..24)) {
        let transport = RecordingTransport::new();
        for udn in &udns {
            transport.serve(udn, "B2BUA Node");
        }
        let (registry, _rx) = registry_with(ControlPointConfig::default(), Arc::clone(&transport));
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));

        for udn in &udns {
            dispatcher.dispatch(search_result(udn, 1800)).unwrap();
        }

        let distinct: HashSet<_> = udns.iter().collect();
        let listed: Vec<_> = registry.list().into_iter().map(|d| d.udn).collect();
        let listed_set: HashSet<_> = listed.iter().collect();

        prop_assert_eq!(listed.len(), distinct.len());
        prop_assert_eq!(listed_set.len(), listed.len());
        prop_assert_eq!(transport.subscribe_count(), distinct.len());

        let sids: Vec<_> = (1..=registry.len())
            .filter_map(|ordinal| registry.get(ordinal).ok())
            .flat_map(|device| device.subscriptions())
            .map(|(_, sid)| sid)
            .collect();
        let sid_set: HashSet<_> = sids.iter().collect();
        prop_assert_eq!(sid_set.len(), sids.len());
    }
}
