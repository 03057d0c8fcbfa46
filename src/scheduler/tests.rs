use super::*;
use crate::future::{CallStatus, FutureError};
use crate::test_utils::*;
use crate::transport::pump::{PumpThread, PumpTransport};
use anyhow::Result;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

assert_impl_all!(CallScheduler<PumpTransport>: Send, Sync, Clone);
assert_impl_all!(CallError: Send, Sync);
assert_impl_all!(CallFuture<String>: Send, Sync);

#[derive(Debug, PartialEq, Eq)]
struct DemoFailure(&'static str);

#[test]
fn test_sync_call_value_round_trip() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    let value = scheduler.sync_call(
        pump.id(),
        || "a".repeat(19),
        Some(Duration::from_millis(500)),
    )?;

    assert_eq!(value, "a".repeat(19));
    Ok(())
}

#[test]
fn test_sync_call_runs_on_the_target_thread() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    let name = scheduler.sync_call(
        pump.id(),
        || thread::current().name().map(String::from),
        None,
    )?;

    assert_eq!(name, Some(format!("crosscall-pump-{}", pump.id())));
    Ok(())
}

#[test]
fn test_no_return_call_with_expected_failure() {
    let (scheduler, pump) = pump_fixture();

    let result = scheduler.try_sync_call::<(), DemoFailure, _>(
        pump.id(),
        || Err(DemoFailure("demo")),
        None,
    );

    match result {
        Err(CallError::Failed(caught)) => assert_eq!(caught.into_inner(), DemoFailure("demo")),
        other => panic!("expected a captured failure, got {other:?}"),
    }
}

#[test]
fn test_expected_failure_payload_survives_the_thread_hop() {
    let (scheduler, pump) = pump_fixture();

    let result =
        scheduler.try_sync_call::<u32, DemoFailure, _>(pump.id(), || Err(DemoFailure("why")), None);

    let caught = result.unwrap_err().into_failure().expect("typed failure");
    assert_eq!(*caught, DemoFailure("why"));
}

#[test]
fn test_unexpected_failure_conversion() {
    let (scheduler, pump) = pump_fixture();

    let result = scheduler.sync_call::<u32, _>(pump.id(), || panic!("anything"), None);

    assert!(matches!(result, Err(CallError::Unexpected)));

    // The pump survives a panicking call.
    let value = scheduler.sync_call(pump.id(), || 7, None).unwrap();
    assert_eq!(value, 7);
}

#[test]
fn test_timeout_when_no_pickup_happens() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    pump.stall(Duration::from_millis(200));

    let result = scheduler.sync_call(pump.id(), || 7, Some(Duration::from_millis(30)));
    assert!(matches!(result, Err(CallError::Timeout)));

    // The timed-out handle was dequeued, and with it the whole queue entry.
    assert!(!scheduler.shared.queues.lock().contains_key(&pump.id()));

    // The next call re-arms from scratch once the pump resumes.
    let value = scheduler.sync_call(pump.id(), || 7, None)?;
    assert_eq!(value, 7);
    Ok(())
}

#[test]
fn test_zero_timeout_on_unexecuted_call() {
    let (scheduler, pump) = pump_fixture();

    pump.stall(Duration::from_millis(100));

    let result = scheduler.sync_call(pump.id(), || 1, Some(Duration::ZERO));

    assert!(matches!(result, Err(CallError::Timeout)));
    assert!(!scheduler.shared.queues.lock().contains_key(&pump.id()));
}

#[test]
fn test_scheduling_failure_leaves_no_handle_behind() {
    init_tracing();
    let scheduler = CallScheduler::new(RefusingTransport);
    let target = crate::transport::PumpId::next();

    let result = scheduler.sync_call(target, || 1, None);

    assert!(matches!(result, Err(CallError::SchedulingFailed(_))));
    assert!(scheduler.shared.queues.lock().is_empty());
}

#[test]
fn test_async_call_poll_loop() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    let future = scheduler.async_call(pump.id(), || {
        thread::sleep(Duration::from_millis(150));
        0x21
    })?;

    let mut polls = 0;
    while future.wait(Some(Duration::from_millis(10))) == CallStatus::Pending {
        polls += 1;
    }

    assert!(polls > 0);
    assert_eq!(future.get_value()?, 33);
    Ok(())
}

#[test]
fn test_async_abort_by_drop_prevents_execution() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    pump.stall(Duration::from_millis(150));

    let executed = Arc::new(AtomicBool::new(false));
    let future = scheduler.async_call(pump.id(), {
        let executed = Arc::clone(&executed);
        move || executed.store(true, Ordering::SeqCst)
    })?;

    assert_eq!(
        future.wait(Some(Duration::from_millis(30))),
        CallStatus::Pending
    );
    drop(future);

    // The handle is gone from the queue before the pump ever resumes.
    assert!(!scheduler.shared.queues.lock().contains_key(&pump.id()));

    thread::sleep(Duration::from_millis(200));
    assert!(!executed.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_async_abort_statuses() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    // Still queued: truly aborted.
    pump.stall(Duration::from_millis(100));
    let future = scheduler.async_call(pump.id(), || 1)?;
    assert_eq!(future.abort()?, CallStatus::Aborted);

    // Already finished: abort reports completion.
    let future = scheduler.async_call(pump.id(), || 2)?;
    assert_eq!(future.wait(None), CallStatus::Complete);
    assert_eq!(future.abort()?, CallStatus::Complete);
    assert_eq!(future.get_value()?, 2);
    Ok(())
}

#[test]
fn test_async_abort_rethrows_captured_failure() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    let future =
        scheduler.try_async_call::<u32, DemoFailure, _>(pump.id(), || Err(DemoFailure("late")))?;
    assert_eq!(future.wait(None), CallStatus::Complete);

    match future.abort() {
        Err(CallError::Failed(caught)) => assert_eq!(*caught, DemoFailure("late")),
        other => panic!("expected the captured failure, got {other:?}"),
    }

    // The failure is rethrown at most once; a later abort sees completion.
    assert_eq!(future.abort()?, CallStatus::Complete);
    Ok(())
}

#[test]
fn test_get_value_before_completion_is_pending() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    pump.stall(Duration::from_millis(100));
    let future = scheduler.async_call(pump.id(), || 5)?;

    assert!(matches!(
        future.get_value(),
        Err(FutureError::ValuePending)
    ));

    assert_eq!(future.wait(None), CallStatus::Complete);
    assert_eq!(future.get_value()?, 5);

    // The value moves out exactly once.
    assert!(matches!(
        future.get_value(),
        Err(FutureError::ValuePending)
    ));
    Ok(())
}

#[test]
fn test_one_pickup_per_empty_to_non_empty_transition() -> Result<()> {
    init_tracing();
    let scheduler = CallScheduler::new(CountingTransport::new());
    let pump = PumpThread::spawn(scheduler.transport().inner())?;

    pump.stall(Duration::from_millis(100));

    // Two calls pile up behind one stalled pump: a single pickup is armed.
    let first = scheduler.async_call(pump.id(), || 1)?;
    let second = scheduler.async_call(pump.id(), || 2)?;
    assert_eq!(scheduler.transport().armed(), 1);

    assert_eq!(first.wait(None), CallStatus::Complete);
    assert_eq!(second.wait(None), CallStatus::Complete);
    assert_eq!(first.get_value()?, 1);
    assert_eq!(second.get_value()?, 2);

    // The drained queue was removed; the next call arms anew.
    let value = scheduler.sync_call(pump.id(), || 3, None)?;
    assert_eq!(value, 3);
    assert_eq!(scheduler.transport().armed(), 2);
    Ok(())
}

#[test]
fn test_calls_execute_in_enqueue_order() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    pump.stall(Duration::from_millis(50));

    let order = Arc::new(Mutex::new(Vec::new()));
    let futures: Vec<_> = (0..5)
        .map(|n| {
            let order = Arc::clone(&order);
            scheduler.async_call(pump.id(), move || order.lock().push(n))
        })
        .collect::<Result<_, _>>()?;

    for future in &futures {
        assert_eq!(future.wait(None), CallStatus::Complete);
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_nested_call_across_two_pumps() -> Result<()> {
    let (scheduler, first) = pump_fixture();
    let second = PumpThread::spawn(scheduler.transport())?;

    let inner_scheduler = scheduler.clone();
    let second_id = second.id();

    let value = scheduler.sync_call(
        first.id(),
        move || {
            let inner = inner_scheduler
                .sync_call(second_id, || 21, None)
                .expect("nested call completes");
            inner * 2
        },
        None,
    )?;

    assert_eq!(value, 42);
    Ok(())
}

#[test]
fn test_concurrent_callers_share_one_target() -> Result<()> {
    let (scheduler, pump) = pump_fixture();

    let mut callers = Vec::new();
    for n in 0..8u64 {
        let scheduler = scheduler.clone();
        let target = pump.id();
        callers.push(thread::spawn(move || {
            scheduler.sync_call(target, move || n * n, None)
        }));
    }

    for (n, caller) in callers.into_iter().enumerate() {
        let value = caller.join().unwrap()?;
        assert_eq!(value, (n * n) as u64);
    }
    Ok(())
}

#[test]
fn test_global_dispatcher_is_a_singleton() {
    let first: *const _ = CallScheduler::global();
    let second: *const _ = CallScheduler::global();
    assert!(std::ptr::eq(first, second));
}
