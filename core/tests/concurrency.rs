use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use storefront_resilience::{
    BreakerError, BreakerState, ChannelConfig, EventChannel, EventName, FaultBreaker, ManualClock,
    SubscribeError,
};
use tokio::sync::oneshot;

fn breaker(failure_threshold: usize, success_threshold: usize) -> (FaultBreaker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let breaker = FaultBreaker::builder("payment_gateway")
        .failure_threshold(failure_threshold)
        .success_threshold(success_threshold)
        .recovery_timeout_secs(60.0)
        .clock(clock.clone())
        .build()
        .expect("valid config");
    (breaker, clock)
}

#[tokio::test]
async fn execute_trips_and_fails_fast_without_invoking() {
    let (breaker, _clock) = breaker(3, 2);
    let invocations = AtomicUsize::new(0);
    let counter = &invocations;

    for _ in 0..3 {
        let result = breaker
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("503 from gateway")
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Dependency("503 from gateway"))));
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    let result = breaker
        .execute(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;

    assert!(matches!(result, Err(BreakerError::Open { .. })));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_callers_fail_fast_while_probe_runs() {
    let (breaker, clock) = breaker(1, 1);
    let _ = breaker.execute(|| async { Err::<(), _>("down") }).await;
    clock.advance(Duration::from_secs(60));

    let (release, hold) = oneshot::channel::<()>();

    let probe = breaker.execute(move || async move {
        hold.await.map_err(|_| "probe abandoned")?;
        Ok::<_, &str>("recovered")
    });

    let contender = async {
        tokio::task::yield_now().await;
        let result = breaker.execute(|| async { Ok::<_, &str>("second") }).await;
        release.send(()).expect("probe still waiting");
        result
    };

    let (probe_result, contender_result) = tokio::join!(probe, contender);

    assert_eq!(probe_result.unwrap(), "recovered");
    assert!(matches!(
        contender_result,
        Err(BreakerError::ProbeInFlight { .. })
    ));
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn cancelled_probe_releases_the_probe_slot() {
    let (breaker, clock) = breaker(1, 2);
    let _ = breaker.execute(|| async { Err::<(), _>("down") }).await;
    clock.advance(Duration::from_secs(60));

    let hung = tokio::time::timeout(
        Duration::from_millis(10),
        breaker.execute(|| std::future::pending::<Result<(), &str>>()),
    )
    .await;
    assert!(hung.is_err(), "probe should have timed out");
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    let result = breaker.execute(|| async { Ok::<_, &str>("ok") }).await;
    assert_eq!(result.unwrap(), "ok");
    assert_eq!(breaker.success_count(), 1);
}

#[test]
fn breaker_shared_across_threads_opens_exactly_once() {
    let opened = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&opened);
    let breaker = Arc::new(
        FaultBreaker::builder("catalog_cache")
            .failure_threshold(25)
            .on_open(move |_| {
                hook.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap(),
    );
    let invoked = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            let invoked = Arc::clone(&invoked);
            let rejected = Arc::clone(&rejected);
            thread::spawn(move || {
                for _ in 0..50 {
                    match breaker.call(|| Err::<(), _>("miss")) {
                        Err(BreakerError::Dependency(_)) => {
                            invoked.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(_) => {
                            rejected.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(()) => unreachable!(),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(breaker.is_open());
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert!(invoked.load(Ordering::SeqCst) >= 25);
    assert!(rejected.load(Ordering::SeqCst) > 0);
    assert_eq!(
        invoked.load(Ordering::SeqCst) + rejected.load(Ordering::SeqCst),
        400
    );
}

#[test]
fn subscriber_cap_holds_under_concurrent_registration() {
    let channel = Arc::new(EventChannel::<serde_json::Value>::with_config(ChannelConfig {
        max_subscribers_per_topic: 50,
    }));
    let rejected = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let channel = Arc::clone(&channel);
            let rejected = Arc::clone(&rejected);
            thread::spawn(move || {
                for _ in 0..10 {
                    match channel.subscribe_fn(EventName::OrderCreated, |_| Ok(())) {
                        Ok(_) => {}
                        Err(SubscribeError::Capacity { limit, .. }) => {
                            assert_eq!(limit, 50);
                            rejected.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(channel.subscriber_count(EventName::OrderCreated), 50);
    assert_eq!(rejected.load(Ordering::SeqCst), 30);
    assert_eq!(channel.publish(EventName::OrderCreated, json!({})).unwrap(), 50);
}

#[tokio::test]
async fn order_flow_publishes_outcome_of_protected_call() {
    let (gateway, _clock) = breaker(2, 2);
    let events = Arc::new(EventChannel::new());
    let audit: Arc<Mutex<Vec<String>>> = Arc::default();

    for name in [EventName::PaymentSucceeded, EventName::PaymentFailed] {
        let audit = Arc::clone(&audit);
        events
            .subscribe_fn(name, move |event| {
                audit.lock().unwrap().push(event.name.clone());
                Ok(())
            })
            .unwrap();
    }

    let outcomes = [Ok("ch_1"), Err("card declined"), Err("card declined"), Ok("ch_2")];
    for outcome in outcomes {
        match gateway.execute(move || async move { outcome }).await {
            Ok(charge) => {
                events
                    .publish(EventName::PaymentSucceeded, json!({ "charge": charge }))
                    .unwrap();
            }
            Err(BreakerError::Dependency(reason)) => {
                events
                    .publish(EventName::PaymentFailed, json!({ "reason": reason }))
                    .unwrap();
            }
            // Rejected calls never reached the gateway; nothing to announce
            Err(_) => {}
        }
    }

    assert_eq!(
        *audit.lock().unwrap(),
        vec!["payment.succeeded", "payment.failed", "payment.failed"]
    );
    assert!(gateway.is_open());
}
