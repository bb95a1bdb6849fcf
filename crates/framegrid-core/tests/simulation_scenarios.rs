//! End-to-end scenarios through the public API.

use framegrid_core::config::{PathConfig, SchedulerConfig};
use framegrid_core::pathfinding::PathPlanner;
use framegrid_core::prelude::*;
use framegrid_core::scheduler::FrameScheduler;

const FRAME: f32 = 1.0 / 60.0;

fn simulation() -> (Simulation, ManualClock) {
    let clock = ManualClock::new();
    (Simulation::new(SubsystemConfig::default(), clock.shared()), clock)
}

#[test]
fn aabb_overlap_then_separation() {
    let (mut sim, _clock) = simulation();
    let a = Body::new(1, Vec3::new(0.0, 0.0, 0.0), Vec3::splat(2.0));
    let b = Body::new(2, Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0));
    assert!(sim.register_object(&a, false, CollisionOptions::default()));
    assert!(sim.register_object(&b, false, CollisionOptions::default()));
    assert!(sim.check_collision(a.id, b.id));

    sim.update_object(&b.moved_to(Vec3::new(10.0, 0.0, 0.0)));
    assert!(!sim.check_collision(a.id, b.id));
}

#[test]
fn straight_path_on_empty_grid() {
    let (mut sim, _clock) = simulation();
    let start = Vec3::new(0.0, 0.0, 0.0);
    let end = Vec3::new(40.0, 0.0, 0.0);
    let options = PathOptions {
        smooth: false,
        ..PathOptions::default()
    };
    let id = sim.find_path(start, end, 0.5, options);
    sim.tick(FRAME);

    let request = sim.path_request(id).unwrap();
    assert_eq!(request.status, PathStatus::Success);
    let waypoints = &request.waypoints;
    assert!(waypoints[0].distance(&start) < 1e-4);
    assert!(waypoints[waypoints.len() - 1].distance(&end) < 1e-4);

    // Progress toward the goal never reverses.
    let mut travelled = 0.0;
    let mut last_remaining = f32::INFINITY;
    for pair in waypoints.windows(2) {
        let step = pair[0].distance(&pair[1]);
        assert!(step >= 0.0);
        travelled += step;
        let remaining = pair[1].distance(&end);
        assert!(remaining <= last_remaining);
        last_remaining = remaining;
    }
    assert!(travelled >= 40.0 - 1e-3);
}

#[test]
fn cached_path_is_identical_to_fresh() {
    let clock = ManualClock::new();
    let mut planner = PathPlanner::new(PathConfig::default(), clock.shared());
    let start = Vec3::new(-30.0, 0.0, 12.0);
    let end = Vec3::new(45.0, 0.0, -20.0);

    let fresh = planner
        .compute_path(start, end, 1.0, &PathOptions::default())
        .unwrap();
    let first = planner.find_path(start, end, 1.0, PathOptions::default());
    planner.process_pending();
    clock.advance(1.0);
    let second = planner.find_path(start, end, 1.0, PathOptions::default());

    assert_eq!(planner.status(second), Some(PathStatus::Cached));
    let queued = &planner.request(first).unwrap().waypoints;
    let cached = &planner.request(second).unwrap().waypoints;
    assert_eq!(queued, cached);
    assert_eq!(&fresh, cached);
    let bits = |w: &[Vec3]| -> Vec<u32> {
        w.iter()
            .flat_map(|v| [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()])
            .collect()
    };
    assert_eq!(bits(&fresh), bits(cached));
}

#[test]
fn k_highest_priority_tasks_run_first() {
    let clock = ManualClock::new();
    let mut scheduler: FrameScheduler<Vec<&'static str>> = FrameScheduler::new(
        SchedulerConfig {
            base_tasks_per_tick: 3,
            ..SchedulerConfig::default()
        },
        clock.shared(),
    );
    let tasks = [
        ("low-1", Priority::Low),
        ("high-1", Priority::High),
        ("bg-1", Priority::Background),
        ("crit-1", Priority::Critical),
        ("high-2", Priority::High),
        ("normal-1", Priority::Normal),
    ];
    for (label, priority) in tasks {
        scheduler.add_task(TaskSpec::from_fn(
            move |log: &mut Vec<&'static str>| -> Result<(), TaskError> {
                log.push(label);
                Ok(())
            },
            priority,
        ));
    }

    let mut log = Vec::new();
    let report = scheduler.tick(&mut log, FRAME);
    assert_eq!(report.executed, 3);
    assert_eq!(log, vec!["crit-1", "high-1", "high-2"]);

    scheduler.tick(&mut log, FRAME);
    assert_eq!(
        log,
        vec!["crit-1", "high-1", "high-2", "normal-1", "low-1", "bg-1"]
    );
}

#[test]
fn flaky_task_completes_on_last_attempt() {
    let (mut sim, _clock) = simulation();
    let mut calls = 0;
    let id = sim
        .add_task(
            TaskSpec::from_fn(
                move |_: &mut Systems| -> Result<(), TaskError> {
                    calls += 1;
                    if calls < 4 {
                        Err(TaskError::failed(format!("attempt {}", calls)))
                    } else {
                        Ok(())
                    }
                },
                Priority::Normal,
            )
            .max_attempts(4),
        )
        .unwrap();

    for _ in 0..3 {
        sim.tick(FRAME);
        assert_eq!(sim.task_status(id), Some(TaskStatus::Queued));
    }
    sim.tick(FRAME);
    let record = sim.scheduler().task(id).unwrap();
    assert!(record.is_completed());
    assert_eq!(record.attempts(), 4);
}

#[test]
fn overflow_sheds_low_priority_work() {
    let clock = ManualClock::new();
    let mut scheduler: FrameScheduler<()> = FrameScheduler::new(
        SchedulerConfig {
            max_queue_size: 3,
            shed_batch: 1,
            ..SchedulerConfig::default()
        },
        clock.shared(),
    );
    let noop = || {
        TaskSpec::from_fn(|_: &mut ()| -> Result<(), TaskError> { Ok(()) }, Priority::Low)
    };

    let low = scheduler.add_task(noop()).unwrap();
    let background = scheduler
        .add_task(TaskSpec {
            priority: Priority::Background,
            ..noop()
        })
        .unwrap();
    scheduler.add_task(TaskSpec {
        priority: Priority::Normal,
        ..noop()
    });

    // Full: the Background task goes first, then the Low one.
    assert!(scheduler
        .add_task(TaskSpec {
            priority: Priority::High,
            ..noop()
        })
        .is_some());
    assert_eq!(scheduler.task_status(background), Some(TaskStatus::Dropped));
    assert_eq!(scheduler.task_status(low), Some(TaskStatus::Queued));
    assert!(scheduler
        .add_task(TaskSpec {
            priority: Priority::Critical,
            ..noop()
        })
        .is_some());
    assert_eq!(scheduler.task_status(low), Some(TaskStatus::Dropped));
    assert_eq!(scheduler.counters().dropped, 2);

    // Nothing left to shed.
    assert!(scheduler
        .add_task(TaskSpec {
            priority: Priority::Normal,
            ..noop()
        })
        .is_none());
    assert_eq!(scheduler.counters().dropped, 3);
    assert_eq!(scheduler.queued_len(), 3);
}

#[test]
fn recurring_scans_put_resting_bodies_to_sleep_and_wake_them() {
    let (mut sim, _clock) = simulation();
    let resting = Body::new(1, Vec3::new(0.0, 0.0, 0.0), Vec3::splat(1.0));
    let mover = Body::new(2, Vec3::new(30.0, 0.0, 0.0), Vec3::splat(1.0))
        .with_velocity(Vec3::new(-5.0, 0.0, 0.0));
    sim.register_object(&resting, false, CollisionOptions::default());
    sim.register_object(&mover, false, CollisionOptions::default());

    for _ in 0..sim.config().collision.sleep_after_checks {
        sim.tick(FRAME);
    }
    assert!(sim.collision().is_sleeping(resting.id));
    assert!(!sim.collision().is_sleeping(mover.id));

    sim.enqueue_update(&mover.moved_to(Vec3::new(3.0, 0.0, 0.0)));
    sim.tick(FRAME);
    assert!(!sim.collision().is_sleeping(resting.id));
}

#[test]
fn metrics_snapshot_is_json() {
    let (mut sim, _clock) = simulation();
    sim.register_object(
        &Body::new(1, Vec3::ZERO, Vec3::splat(1.0)),
        false,
        CollisionOptions::default(),
    );
    sim.tick(FRAME);
    let metrics = sim.metrics();
    let value: serde_json::Value = serde_json::from_str(&metrics.to_json().unwrap()).unwrap();
    assert_eq!(value["spatial"]["objects"], 1);
    assert_eq!(value["frame"], 1);
}
