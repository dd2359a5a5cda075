use harvest_types::HybridTimestamp;

#[test]
fn tick_is_strictly_increasing() {
    let mut ts = HybridTimestamp::now();
    for _ in 0..1_000 {
        let next = ts.tick();
        assert!(next > ts);
        ts = next;
    }
}

#[test]
fn tick_increments_logical_within_same_millisecond() {
    let far_future = HybridTimestamp::new(u64::MAX - 1, 3);
    let next = far_future.tick();
    assert_eq!(next.wall_time(), far_future.wall_time());
    assert_eq!(next.logical(), 4);
}

#[test]
fn receive_exceeds_both_sides() {
    let local = HybridTimestamp::new(1_000, 2);
    let remote = HybridTimestamp::new(2_000, 9);
    let merged = local.receive(&remote);
    assert!(merged > local);
    assert!(merged > remote);
}

#[test]
fn receive_from_future_clock_stays_ahead() {
    let local = HybridTimestamp::now();
    let remote = HybridTimestamp::new(local.wall_time() + 60_000, 0);
    let merged = local.receive(&remote);
    assert!(merged > remote);
    assert_eq!(merged.wall_time(), remote.wall_time());
}

#[test]
fn ordering_compares_wall_then_logical() {
    assert!(HybridTimestamp::new(5, 0) < HybridTimestamp::new(6, 0));
    assert!(HybridTimestamp::new(5, 1) < HybridTimestamp::new(5, 2));
    assert_eq!(HybridTimestamp::new(5, 1), HybridTimestamp::new(5, 1));
}

#[test]
fn from_millis_carries_wall_time() {
    let ts = HybridTimestamp::from_millis(123_456);
    assert_eq!(ts.wall_time(), 123_456);
    assert_eq!(ts.logical(), 0);
}
