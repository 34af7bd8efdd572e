use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rstest::rstest;
use servo_core::{RunExit, Scheduler, ServoError};
use servo_traits::ManualClock;

#[derive(Default)]
struct Counts {
    a: u32,
    b: u32,
    log: Vec<&'static str>,
}

fn sched() -> (Scheduler<Counts>, ManualClock) {
    let clock = ManualClock::new();
    (Scheduler::new(Arc::new(clock.clone())), clock)
}

#[rstest]
fn interleaves_tasks_by_deadline() {
    let (mut s, clock) = sched();
    s.register("a", Duration::from_millis(10), |c: &mut Counts, _| {
        c.a += 1;
        Ok(())
    })
    .unwrap();
    s.register("b", Duration::from_millis(25), |c: &mut Counts, _| {
        c.b += 1;
        Ok(())
    })
    .unwrap();
    s.register("quit", Duration::from_millis(100), |_, d| {
        d.stop();
        Ok(())
    })
    .unwrap();

    let mut counts = Counts::default();
    assert_eq!(s.run(&mut counts), RunExit::Stopped);
    assert_eq!(counts.a, 10);
    assert_eq!(counts.b, 4);
    assert_eq!(clock.elapsed(), Duration::from_millis(100));
}

#[rstest]
fn same_deadline_runs_in_registration_order() {
    let (mut s, _) = sched();
    for name in ["first", "second", "third"] {
        s.register(name, Duration::from_millis(5), move |c: &mut Counts, _| {
            c.log.push(name);
            Ok(())
        })
        .unwrap();
    }
    s.register("quit", Duration::from_millis(5), |_, d| {
        d.stop();
        Ok(())
    })
    .unwrap();

    let mut counts = Counts::default();
    s.run(&mut counts);
    assert_eq!(counts.log, vec!["first", "second", "third"]);
}

#[rstest]
fn overdue_task_catches_up_one_tick_per_pass() {
    let (mut s, clock) = sched();
    s.register("a", Duration::from_millis(10), |c: &mut Counts, _| {
        c.a += 1;
        Ok(())
    })
    .unwrap();

    let mut counts = Counts::default();
    clock.advance(Duration::from_millis(35));
    assert_eq!(s.run_pending(&mut counts), 1);
    assert_eq!(s.run_pending(&mut counts), 1);
    assert_eq!(s.run_pending(&mut counts), 1);
    assert_eq!(s.run_pending(&mut counts), 0);
    assert_eq!(counts.a, 3);
}

#[rstest]
fn task_can_unregister_itself() {
    let (mut s, _) = sched();
    s.register("once", Duration::from_millis(1), |c: &mut Counts, d| {
        c.a += 1;
        d.unregister("once");
        Ok(())
    })
    .unwrap();

    let mut counts = Counts::default();
    assert_eq!(s.run(&mut counts), RunExit::Idle);
    assert_eq!(counts.a, 1);
    assert!(s.is_empty());
}

#[rstest]
fn failing_task_is_isolated() {
    let (mut s, _) = sched();
    s.register("flaky", Duration::from_millis(2), |c: &mut Counts, _| {
        c.a += 1;
        Err(ServoError::Encoder("glitch".into()))
    })
    .unwrap();
    s.register("steady", Duration::from_millis(2), |c: &mut Counts, d| {
        c.b += 1;
        if c.b == 3 {
            d.stop();
        }
        Ok(())
    })
    .unwrap();

    let mut counts = Counts::default();
    assert_eq!(s.run(&mut counts), RunExit::Stopped);
    assert_eq!(counts.a, 3);
    assert_eq!(counts.b, 3);
    let faults = s.take_faults();
    assert_eq!(faults.len(), 3);
    assert!(faults.iter().all(|f| f.task == "flaky"));
    assert!(s.faults().is_empty());
}

#[rstest]
fn disabled_task_is_skipped() {
    let (mut s, _) = sched();
    s.register("a", Duration::from_millis(1), |c: &mut Counts, _| {
        c.a += 1;
        Ok(())
    })
    .unwrap();
    assert!(s.set_enabled("a", false));
    let mut counts = Counts::default();
    assert_eq!(s.run(&mut counts), RunExit::Idle);
    assert_eq!(counts.a, 0);
    assert!(!s.set_enabled("ghost", true));
}

#[rstest]
fn abort_flag_ends_run() {
    let clock = ManualClock::new();
    let flag = Arc::new(AtomicBool::new(false));
    let mut s: Scheduler<Counts> =
        Scheduler::new(Arc::new(clock.clone())).with_abort_flag(flag.clone());
    let raised = flag.clone();
    s.register("a", Duration::from_millis(1), move |c: &mut Counts, _| {
        c.a += 1;
        if c.a == 5 {
            raised.store(true, Ordering::Relaxed);
        }
        Ok(())
    })
    .unwrap();

    let mut counts = Counts::default();
    assert_eq!(s.run(&mut counts), RunExit::Aborted);
    assert_eq!(counts.a, 5);
    assert_eq!(clock.elapsed(), Duration::from_millis(5));
}

// Linux `Instant` holds signed seconds, so one interval fits and two do not.
#[cfg(target_os = "linux")]
#[rstest]
fn rearm_past_the_end_of_time_disables_the_task() {
    let (mut s, _clock) = sched();
    s.register("far", Duration::from_secs(u64::MAX / 3), |c: &mut Counts, _| {
        c.a += 1;
        Ok(())
    })
    .unwrap();
    let mut counts = Counts::default();
    assert_eq!(s.run(&mut counts), RunExit::Idle);
    assert_eq!(counts.a, 1);
    assert_eq!(s.faults().len(), 1);
    assert_eq!(s.faults()[0].task, "far");
    assert!(matches!(s.faults()[0].error, ServoError::Config(_)));
}
