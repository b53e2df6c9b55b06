//! Instance table behavior: round robin, identity checks, expiry and sync merges

use minireg::common::utils::timestamp_now;
use minireg::registry::{InstanceStore, RegisterOutcome, ServiceInstance};
use minireg::Error;

fn instance(name: &str, id: &str, ip: &str, port: u32) -> ServiceInstance {
    ServiceInstance::new(name, id, ip, port)
}

#[test]
fn test_register_then_discover() {
    let store = InstanceStore::new();
    store
        .register(instance("orders", "orders-1", "10.0.0.5", 9000))
        .unwrap();

    let found = store.discover("orders").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].service_id, "orders-1");
    assert_eq!(found[0].ip_address, "10.0.0.5");
}

#[test]
fn test_round_robin_order() {
    let store = InstanceStore::new();
    store.register(instance("svc", "a", "10.0.0.1", 1)).unwrap();
    store.register(instance("svc", "b", "10.0.0.2", 1)).unwrap();
    store.register(instance("svc", "c", "10.0.0.3", 1)).unwrap();

    let picks: Vec<String> = (0..4)
        .map(|_| store.discover("svc").unwrap()[0].service_id.clone())
        .collect();
    assert_eq!(picks, vec!["a", "b", "c", "a"]);
}

#[test]
fn test_discover_all_does_not_rotate() {
    let store = InstanceStore::new();
    store.register(instance("b-svc", "b1", "10.0.0.1", 1)).unwrap();
    store.register(instance("a-svc", "a1", "10.0.0.1", 2)).unwrap();
    store.register(instance("a-svc", "a2", "10.0.0.1", 3)).unwrap();

    let ids: Vec<String> = store
        .discover("")
        .unwrap()
        .into_iter()
        .map(|i| i.service_id)
        .collect();
    assert_eq!(ids, vec!["a1", "a2", "b1"]);
    assert_eq!(store.discover("a-svc").unwrap()[0].service_id, "a1");
}

#[test]
fn test_discover_unknown_service() {
    let store = InstanceStore::new();
    assert!(matches!(store.discover("ghost"), Err(Error::NotFound(_))));
    assert!(store.discover("").unwrap().is_empty());
}

#[test]
fn test_reregister_with_different_endpoint_conflicts() {
    let store = InstanceStore::new();
    store.register(instance("svc", "s1", "10.0.0.1", 9000)).unwrap();

    let err = store
        .register(instance("svc", "s1", "10.0.0.1", 9001))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    let err = store
        .register(instance("svc", "s1", "10.0.0.2", 9000))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(store.get("s1").unwrap().port, 9000);
}

#[test]
fn test_reregister_same_identity_is_heartbeat() {
    let store = InstanceStore::new();
    store.register(instance("svc", "s1", "10.0.0.1", 9000)).unwrap();

    // Push the stored heartbeat into the past so the refresh is observable.
    let mut old = store.get("s1").unwrap();
    old.registered_at -= 100;
    old.last_heartbeat -= 100;
    old.registered_gmt_time.clear();
    old.last_heartbeat_gmt_time.clear();
    store.merge_from_sync(old.clone()).unwrap();

    let outcome = store
        .register(instance("svc", "s1", "10.0.0.1", 9000))
        .unwrap();
    let refreshed = match outcome {
        RegisterOutcome::Refreshed(ins) => ins,
        other => panic!("expected a refresh, got {:?}", other),
    };
    assert!(refreshed.last_heartbeat > old.last_heartbeat);
    assert_eq!(refreshed.registered_at, old.registered_at);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_mismatched_claims_change_nothing() {
    let store = InstanceStore::new();
    store.register(instance("svc", "s1", "10.0.0.1", 9000)).unwrap();
    let before = store.get("s1").unwrap();

    let mut wrong_name = before.claim();
    wrong_name.service_name = "other".into();
    let mut wrong_ip = before.claim();
    wrong_ip.ip_address = "10.0.0.2".into();
    let mut wrong_port = before.claim();
    wrong_port.port = 9001;

    for (claim, field) in [
        (wrong_name, "serviceName"),
        (wrong_ip, "ipAddress"),
        (wrong_port, "port"),
    ] {
        match store.heartbeat(&claim) {
            Err(Error::Mismatch { field: f, .. }) => assert_eq!(f, field),
            other => panic!("expected mismatch on {}, got {:?}", field, other),
        }
        match store.unregister(&claim) {
            Err(Error::Mismatch { field: f, .. }) => assert_eq!(f, field),
            other => panic!("expected mismatch on {}, got {:?}", field, other),
        }
    }

    assert_eq!(store.get("s1").unwrap(), before);
}

#[test]
fn test_heartbeat_advances_only_last_heartbeat() {
    let store = InstanceStore::new();
    let now = timestamp_now();
    let mut ins = instance("svc", "s1", "10.0.0.1", 9000);
    ins.registered_at = now - 100;
    ins.last_heartbeat = now - 100;
    store.merge_from_sync(ins.clone()).unwrap();
    let before = store.get("s1").unwrap();

    let updated = store.heartbeat(&ins.claim()).unwrap();
    assert!(updated.last_heartbeat >= now);
    assert_ne!(updated.last_heartbeat_gmt_time, before.last_heartbeat_gmt_time);
    assert_eq!(updated.registered_at, before.registered_at);
    assert_eq!(updated.registered_gmt_time, before.registered_gmt_time);
    assert_eq!(store.get("s1").unwrap(), updated);
}

#[test]
fn test_heartbeat_shaped_register_cannot_rewind_or_outrun_clock() {
    let store = InstanceStore::new();
    store.register(instance("svc", "s1", "10.0.0.1", 9000)).unwrap();
    let before = store.get("s1").unwrap();

    let mut rewind = ServiceInstance::default();
    rewind.service_id = "s1".into();
    rewind.last_heartbeat = 1;
    store.register(rewind).unwrap();
    assert_eq!(store.get("s1").unwrap().last_heartbeat, before.last_heartbeat);
    assert!(store.expired(60).is_empty());

    let mut future = ServiceInstance::default();
    future.service_id = "s1".into();
    future.last_heartbeat = i64::MAX / 2;
    store.register(future).unwrap();
    let after = store.get("s1").unwrap();
    assert!(after.last_heartbeat <= timestamp_now());
    assert!(!after.last_heartbeat_gmt_time.is_empty());
}

#[test]
fn test_unknown_id_is_not_found() {
    let store = InstanceStore::new();
    let claim = instance("svc", "nobody", "10.0.0.1", 1).claim();
    assert!(matches!(store.heartbeat(&claim), Err(Error::NotFound(_))));
    assert!(matches!(store.unregister(&claim), Err(Error::NotFound(_))));
}

#[test]
fn test_unregister_last_instance_drops_service() {
    let store = InstanceStore::new();
    let ins = instance("svc", "s1", "10.0.0.1", 9000);
    store.register(ins.clone()).unwrap();
    store.discover("svc").unwrap();

    store.unregister(&ins.claim()).unwrap();
    assert!(store.discover("svc").is_err());
    assert!(store.export_load_balance_state().is_empty());
    assert!(store.is_empty());
}

#[test]
fn test_expired_then_removed() {
    let store = InstanceStore::new();
    let now = timestamp_now();

    let mut stale = instance("svc", "stale", "10.0.0.1", 1);
    stale.registered_at = now - 200;
    stale.last_heartbeat = now - 61;
    store.merge_from_sync(stale.clone()).unwrap();

    let mut fresh = instance("svc", "fresh", "10.0.0.1", 2);
    fresh.registered_at = now - 200;
    fresh.last_heartbeat = now - 10;
    store.merge_from_sync(fresh).unwrap();

    let expired = store.expired_at(now, 60);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].service_id, "stale");
    assert!(store.expired_at(now, 61).is_empty());

    store.unregister(&stale.claim()).unwrap();
    let remaining = store.discover("").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].service_id, "fresh");
}

#[test]
fn test_merge_preserves_timestamps_when_invalid() {
    let store = InstanceStore::new();
    let mut ins = instance("svc", "s1", "10.0.0.1", 9000);
    ins.registered_at = 1_700_000_000;
    ins.last_heartbeat = 1_700_000_050;
    store.merge_from_sync(ins.clone()).unwrap();

    let mut incoming = ins.clone();
    incoming.registered_at = 0;
    incoming.last_heartbeat = -1;
    incoming.registered_gmt_time.clear();
    incoming.last_heartbeat_gmt_time.clear();
    store.merge_from_sync(incoming).unwrap();

    let stored = store.get("s1").unwrap();
    assert_eq!(stored.registered_at, 1_700_000_000);
    assert_eq!(stored.last_heartbeat, 1_700_000_050);
    assert_eq!(stored.registered_gmt_time, "2023-11-14 22:13:20");

    let mut newer = ins;
    newer.last_heartbeat = 1_700_000_100;
    newer.last_heartbeat_gmt_time.clear();
    store.merge_from_sync(newer).unwrap();
    assert_eq!(store.get("s1").unwrap().last_heartbeat, 1_700_000_100);
}

#[test]
fn test_merge_stamps_new_instance_without_timestamps() {
    let store = InstanceStore::new();
    store
        .merge_from_sync(instance("svc", "s1", "10.0.0.1", 9000))
        .unwrap();

    let stored = store.get("s1").unwrap();
    assert!(stored.registered_at > 0);
    assert!(stored.last_heartbeat > 0);
    assert!(!stored.last_heartbeat_gmt_time.is_empty());
}
