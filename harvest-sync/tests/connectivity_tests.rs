use harvest_sync::{ConnectivityEvent, ConnectivityMonitor, ConnectivitySignal};
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(500);

#[tokio::test(start_paused = true)]
async fn offline_settles_after_debounce_window() {
    let monitor = ConnectivityMonitor::new(DEBOUNCE);
    let mut events = monitor.subscribe();

    monitor.report(ConnectivitySignal::Offline);
    assert!(monitor.is_online(), "must not settle before the window");

    tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
    assert!(!monitor.is_online());
    assert!(matches!(events.try_recv(), Ok(ConnectivityEvent::Offline)));
}

#[tokio::test(start_paused = true)]
async fn flapping_within_window_collapses_to_nothing() {
    let monitor = ConnectivityMonitor::new(DEBOUNCE);
    let mut events = monitor.subscribe();

    monitor.report(ConnectivitySignal::Offline);
    tokio::time::sleep(Duration::from_millis(100)).await;
    monitor.report(ConnectivitySignal::Online);
    tokio::time::sleep(DEBOUNCE * 2).await;

    // Started online, ended online: no transition emitted.
    assert!(monitor.is_online());
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn flap_sequence_emits_single_transition() {
    let monitor = ConnectivityMonitor::new(DEBOUNCE);
    let mut events = monitor.subscribe();

    monitor.report(ConnectivitySignal::Offline);
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.report(ConnectivitySignal::Online);
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.report(ConnectivitySignal::Offline);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert!(matches!(events.try_recv(), Ok(ConnectivityEvent::Offline)));
    assert!(events.try_recv().is_err(), "flaps must collapse to one event");
}

#[tokio::test(start_paused = true)]
async fn foreground_emits_resumed_without_delay() {
    let monitor = ConnectivityMonitor::new(DEBOUNCE);
    let mut events = monitor.subscribe();

    monitor.report(ConnectivitySignal::Background);
    monitor.report(ConnectivitySignal::Foreground);

    assert!(matches!(events.try_recv(), Ok(ConnectivityEvent::Resumed)));
}

#[tokio::test(start_paused = true)]
async fn foreground_while_already_visible_is_ignored() {
    let monitor = ConnectivityMonitor::new(DEBOUNCE);
    let mut events = monitor.subscribe();

    monitor.report(ConnectivitySignal::Foreground);

    assert!(events.try_recv().is_err());
}
