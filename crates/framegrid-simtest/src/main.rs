//! framegrid headless harness
//!
//! Drives the subsystem from a hecs world of moving boxes and validates the
//! guarantees the host relies on. Runs on a manual clock, so results are
//! deterministic for a given seed.
//!
//! Usage:
//!   cargo run -p framegrid-simtest
//!   cargo run -p framegrid-simtest -- --verbose
//!   cargo run -p framegrid-simtest -- --config tuning.json --seed 7 --frames 600

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use framegrid_core::prelude::*;
use framegrid_core::scheduler::TickReport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FRAME: f64 = 1.0 / 60.0;
const ARENA: f32 = 120.0;

// ── ECS components ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Position(Vec3);

#[derive(Debug, Clone, Copy)]
struct Velocity(Vec3);

#[derive(Debug, Clone, Copy)]
struct Extent(Vec3);

#[derive(Debug, Clone, Copy)]
struct Handle(EntityId);

/// Marks bodies that never move.
#[derive(Debug, Clone, Copy)]
struct Anchored;

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

impl TestResult {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Headless validation run for framegrid.
#[derive(Parser, Debug)]
#[command(name = "framegrid-simtest", version)]
struct Options {
    /// Print every check, not only failures
    #[arg(short, long)]
    verbose: bool,

    /// JSON tuning file to validate and run with
    #[arg(short, long = "config", value_name = "FILE")]
    config_path: Option<PathBuf>,

    /// Seed for body placement and velocities
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of bodies in the moving world
    #[arg(long, default_value_t = 400)]
    bodies: usize,

    /// Frames to simulate
    #[arg(long, default_value_t = 300)]
    frames: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let options = Options::parse();
    println!("=== framegrid Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Configuration
    let config = match load_config(&options, &mut results) {
        Some(config) => config,
        None => SubsystemConfig::default(),
    };

    // 2. Moving world: indexing, queries, collision
    let mut harness = Harness::new(config.clone(), &options);
    results.extend(harness.run_world(&options));

    // 3. Pathfinding
    results.extend(validate_pathfinding(&config, options.verbose));

    // 4. Scheduling
    results.extend(validate_scheduler(&config));

    // 5. Metrics and shutdown
    results.extend(harness.finish(options.verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || options.verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

// ── 1. Configuration ────────────────────────────────────────────────────

fn load_config(options: &Options, results: &mut Vec<TestResult>) -> Option<SubsystemConfig> {
    println!("--- Configuration ---");
    let defaults = SubsystemConfig::default().validate();
    results.push(TestResult::new(
        "default_config_valid",
        defaults.is_empty(),
        format!("{} problems", defaults.len()),
    ));

    let path = options.config_path.as_ref()?;
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            let detail = format!("{}: {}", path.display(), e);
            results.push(TestResult::new("config_read", false, detail));
            return None;
        }
    };
    match SubsystemConfig::from_json(&text) {
        Ok(config) => {
            let problems = config.validate();
            let detail = problems
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            results.push(TestResult::new("config_file_valid", problems.is_empty(), detail));
            Some(config)
        }
        Err(e) => {
            results.push(TestResult::new("config_parse", false, e.to_string()));
            None
        }
    }
}

// ── 2. Moving world ─────────────────────────────────────────────────────

struct Harness {
    world: hecs::World,
    sim: Simulation,
    clock: ManualClock,
    rng: StdRng,
    collisions: usize,
    reports: Vec<TickReport>,
}

impl Harness {
    fn new(config: SubsystemConfig, options: &Options) -> Self {
        let clock = ManualClock::new();
        let sim = Simulation::new(config, clock.shared());
        let mut harness = Self {
            world: hecs::World::new(),
            sim,
            clock,
            rng: StdRng::seed_from_u64(options.seed),
            collisions: 0,
            reports: Vec::new(),
        };
        harness.populate(options.bodies);
        harness
    }

    fn populate(&mut self, count: usize) {
        for i in 0..count {
            let id = EntityId(i as u64);
            let position = Vec3::new(
                self.rng.gen_range(-ARENA..ARENA),
                self.rng.gen_range(-10.0..10.0),
                self.rng.gen_range(-ARENA..ARENA),
            );
            let extent = Vec3::splat(self.rng.gen_range(0.5..4.0));
            let anchored = self.rng.gen_bool(0.2);
            let velocity = if anchored {
                Vec3::ZERO
            } else {
                Vec3::new(
                    self.rng.gen_range(-8.0..8.0),
                    0.0,
                    self.rng.gen_range(-8.0..8.0),
                )
            };
            let body = Body::new(id.0, position, extent).with_velocity(velocity);
            let options = CollisionOptions {
                priority: if i % 10 == 0 { Priority::High } else { Priority::Normal },
                ..CollisionOptions::default()
            };
            self.sim.register_object(&body, anchored, options);
            let entity = self
                .world
                .spawn((Handle(id), Position(position), Velocity(velocity), Extent(extent)));
            if anchored {
                let _ = self.world.insert_one(entity, Anchored);
            }
        }
    }

    /// Integrate, bounce at the arena walls and queue index updates.
    fn step(&mut self) {
        let dt = FRAME as f32;
        let mut moved = Vec::new();
        for (_, (handle, position, velocity, extent)) in self
            .world
            .query_mut::<(&Handle, &mut Position, &mut Velocity, &Extent)>()
            .without::<&Anchored>()
        {
            let mut next = Vec3::new(
                position.0.x + velocity.0.x * dt,
                position.0.y,
                position.0.z + velocity.0.z * dt,
            );
            if next.x.abs() > ARENA {
                velocity.0.x = -velocity.0.x;
                next.x = next.x.clamp(-ARENA, ARENA);
            }
            if next.z.abs() > ARENA {
                velocity.0.z = -velocity.0.z;
                next.z = next.z.clamp(-ARENA, ARENA);
            }
            position.0 = next;
            moved.push(Body::new(handle.0 .0, next, extent.0).with_velocity(velocity.0));
        }
        for body in &moved {
            self.sim.enqueue_update(body);
        }
        self.clock.advance(FRAME);
        self.reports.push(self.sim.tick(dt));
        self.collisions += self.sim.drain_collision_events().len();
    }

    fn run_world(&mut self, options: &Options) -> Vec<TestResult> {
        println!("--- Moving World ---");
        let mut results = Vec::new();
        let count = options.bodies;

        results.push(TestResult::new(
            "all_registered",
            self.sim.spatial().len() == count && self.sim.collision().metrics().registered == count,
            format!("{} indexed", self.sim.spatial().len()),
        ));

        for _ in 0..options.frames {
            self.step();
        }

        // Bring the index fully up to date before comparing against the world.
        let systems = self.sim.systems_mut();
        systems.spatial.process_pending_updates(usize::MAX);
        systems.sync_moved();

        results.push(self.check_positions());
        results.push(self.check_nearby_contains_self());
        results.push(self.check_region_query());
        results.push(self.check_narrow_phase_agreement());
        results.push(self.check_removal());

        let executed: usize = self.reports.iter().map(|r| r.executed).sum();
        results.push(TestResult::new(
            "recurring_work_runs",
            executed >= options.frames,
            format!("{} executions over {} frames", executed, options.frames),
        ));
        results.push(TestResult::new(
            "collisions_reported",
            self.sim.collision().metrics().scans > 0,
            format!(
                "{} scans, {} events",
                self.sim.collision().metrics().scans,
                self.collisions
            ),
        ));
        if options.verbose {
            let m = self.sim.collision().metrics();
            println!(
                "  collision: {} awake, {} sleeping, {} narrow checks, cache hit rate {:.2}",
                m.awake, m.sleeping, m.narrow_phase_checks, m.pair_cache_hit_rate
            );
        }
        results
    }

    fn check_positions(&self) -> TestResult {
        let tolerance = self.sim.config().spatial.update_tolerance + 1e-3;
        let mut worst = 0.0f32;
        let mut missing = 0;
        for (_, (handle, position)) in self.world.query::<(&Handle, &Position)>().iter() {
            match self.sim.spatial().record(handle.0) {
                Some(record) => worst = worst.max(record.position.distance(&position.0)),
                None => missing += 1,
            }
        }
        TestResult::new(
            "index_tracks_world",
            missing == 0 && worst <= tolerance,
            format!("max drift {:.4}, {} missing", worst, missing),
        )
    }

    fn check_nearby_contains_self(&mut self) -> TestResult {
        let handles: Vec<(EntityId, Vec3)> = self
            .world
            .query::<(&Handle, &Position)>()
            .iter()
            .map(|(_, (h, p))| (h.0, p.0))
            .collect();
        let mut failures = 0;
        let mut unsorted = 0;
        for (id, _) in &handles {
            let Some(center) = self.sim.spatial().record(*id).map(|r| r.position) else {
                failures += 1;
                continue;
            };
            let radius = self.rng.gen_range(0.0..20.0);
            let hits = self.sim.nearby_objects(center, radius, true);
            if !hits.iter().any(|h| h.id == *id) {
                failures += 1;
            }
            if !hits.windows(2).all(|w| w[0].distance <= w[1].distance) {
                unsorted += 1;
            }
        }
        TestResult::new(
            "nearby_contains_self",
            failures == 0 && unsorted == 0,
            format!("{} misses, {} unsorted of {}", failures, unsorted, handles.len()),
        )
    }

    fn check_region_query(&mut self) -> TestResult {
        let min = Vec3::new(-40.0, -20.0, -40.0);
        let max = Vec3::new(40.0, 20.0, 40.0);
        let region = Aabb::new(min, max);
        let found: HashSet<EntityId> = self.sim.objects_in_region(min, max).into_iter().collect();
        let expected: HashSet<EntityId> = self
            .sim
            .spatial()
            .ids()
            .filter(|id| {
                self.sim
                    .spatial()
                    .record(*id)
                    .is_some_and(|r| r.aabb.intersects(&region))
            })
            .collect();
        let missing = expected.difference(&found).count();
        TestResult::new(
            "region_query_complete",
            missing == 0,
            format!("{} found, {} expected, {} missing", found.len(), expected.len(), missing),
        )
    }

    fn check_narrow_phase_agreement(&mut self) -> TestResult {
        let ids: Vec<EntityId> = self.sim.spatial().ids().collect();
        let narrow = self.sim.config().collision.narrow_phase;
        let mut checked = 0;
        let mut mismatches = 0;
        for _ in 0..2_000 {
            if ids.len() < 2 {
                break;
            }
            let a = ids[self.rng.gen_range(0..ids.len())];
            let b = ids[self.rng.gen_range(0..ids.len())];
            let (Some(ra), Some(rb)) = (self.sim.spatial().record(a), self.sim.spatial().record(b))
            else {
                continue;
            };
            let both_static = ra.is_static && rb.is_static;
            let both_sleeping =
                self.sim.collision().is_sleeping(a) && self.sim.collision().is_sleeping(b);
            if a == b || both_static || both_sleeping {
                continue;
            }
            let truth = narrow.test(&ra.aabb, &rb.aabb).colliding;
            checked += 1;
            if self.sim.check_collision(a, b) != truth {
                mismatches += 1;
            }
        }
        TestResult::new(
            "narrow_phase_agrees",
            mismatches == 0,
            format!("{} mismatches over {} pairs", mismatches, checked),
        )
    }

    fn check_removal(&mut self) -> TestResult {
        let doomed: Vec<(hecs::Entity, EntityId, Vec3)> = self
            .world
            .query::<(&Handle, &Position)>()
            .iter()
            .step_by(7)
            .map(|(e, (h, p))| (e, h.0, p.0))
            .collect();
        for (entity, _, _) in &doomed {
            let _ = self.world.despawn(*entity);
        }
        let alive: HashSet<EntityId> = self
            .world
            .query::<&Handle>()
            .iter()
            .map(|(_, h)| h.0)
            .collect();
        let pruned = self.sim.prune_dead(|id| alive.contains(&id));

        let mut leaks = 0;
        for (_, id, position) in &doomed {
            let in_grid = self.sim.spatial().grid().contains(*id);
            let in_tree = self.sim.spatial().octree().node_of(*id).is_some();
            let in_collision = self.sim.collision().is_registered(*id);
            let in_query = self
                .sim
                .nearby_objects(*position, 10.0, true)
                .iter()
                .any(|h| h.id == *id);
            if in_grid || in_tree || in_collision || in_query {
                leaks += 1;
            }
        }
        TestResult::new(
            "removal_purges_everything",
            pruned.len() == doomed.len() && leaks == 0,
            format!("{} pruned, {} leaks", pruned.len(), leaks),
        )
    }

    fn finish(&mut self, verbose: bool) -> Vec<TestResult> {
        println!("--- Metrics & Shutdown ---");
        let mut results = Vec::new();
        let metrics = self.sim.metrics();
        log::info!("{}", metrics.summary());
        match metrics.to_json() {
            Ok(json) => {
                let parsed = serde_json::from_str::<serde_json::Value>(&json);
                results.push(TestResult::new(
                    "metrics_json",
                    parsed.is_ok_and(|v| v["frame"].as_u64() == Some(metrics.frame)),
                    format!("{} bytes", json.len()),
                ));
                if verbose {
                    println!("{}", json);
                }
            }
            Err(e) => results.push(TestResult::new("metrics_json", false, e.to_string())),
        }

        self.sim.shutdown();
        let request = self
            .sim
            .find_path(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 0.5, PathOptions::default());
        let report = self.sim.tick(FRAME as f32);
        results.push(TestResult::new(
            "shutdown_is_final",
            self.sim.path_status(request) == Some(PathStatus::Failed)
                && report.executed == 0
                && self.sim.nearby_objects(Vec3::ZERO, 50.0, true).is_empty(),
            format!("path {:?}", self.sim.path_status(request)),
        ));
        results
    }
}

// ── 3. Pathfinding ──────────────────────────────────────────────────────

fn validate_pathfinding(config: &SubsystemConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Pathfinding ---");
    let mut results = Vec::new();
    let clock = ManualClock::new();
    let mut sim = Simulation::new(config.clone(), clock.shared());

    let start = Vec3::new(-40.0, 0.0, 0.0);
    let end = Vec3::new(40.0, 0.0, 0.0);
    let open = sim.find_path(start, end, 0.5, PathOptions::default());
    run_until_resolved(&mut sim, &clock, open);
    let open_len = sim.path_request(open).map(|r| path_length(&r.waypoints));
    results.push(TestResult::new(
        "open_field_path",
        sim.path_status(open) == Some(PathStatus::Success)
            && open_len.is_some_and(|l| (l - 80.0).abs() < 1.0),
        format!("length {:?}", open_len),
    ));

    // A static wall between the endpoints forces a detour.
    let wall = Body::new(9_000, Vec3::ZERO, Vec3::new(4.0, 32.0, 200.0));
    sim.register_object(&wall, true, CollisionOptions::default());
    let blocked = sim.rebuild_navigation();
    results.push(TestResult::new(
        "wall_blocks_cells",
        blocked > 0,
        format!("{} cells blocked", blocked),
    ));

    let detour = sim.find_path(start, end, 0.5, PathOptions::default());
    run_until_resolved(&mut sim, &clock, detour);
    match sim.path_request(detour) {
        Some(request) if request.status == PathStatus::Success => {
            let around = request.waypoints.iter().any(|w| w.z.abs() >= 100.0);
            let length = path_length(&request.waypoints);
            results.push(TestResult::new(
                "detour_around_wall",
                around && length > 200.0,
                format!(
                    "{} waypoints, length {:.1}, hierarchical {}",
                    request.waypoints.len(),
                    length,
                    request.used_hierarchy
                ),
            ));
        }
        other => results.push(TestResult::new(
            "detour_around_wall",
            false,
            format!("{:?}", other.map(|r| (r.status, r.error.clone()))),
        )),
    }

    let cached = sim.find_path(start, end, 0.5, PathOptions::default());
    let same = match (sim.path_request(detour), sim.path_request(cached)) {
        (Some(a), Some(b)) => a.waypoints == b.waypoints,
        _ => false,
    };
    results.push(TestResult::new(
        "repeat_served_from_cache",
        sim.path_status(cached) == Some(PathStatus::Cached) && same,
        format!("{:?}", sim.path_status(cached)),
    ));

    let inside = sim.find_path(start, Vec3::new(0.0, 0.0, 10.0), 0.5, PathOptions::default());
    run_until_resolved(&mut sim, &clock, inside);
    results.push(TestResult::new(
        "goal_inside_wall_fails",
        sim.path_status(inside) == Some(PathStatus::Failed),
        format!(
            "{:?}",
            sim.path_request(inside).and_then(|r| r.error.clone())
        ),
    ));

    if verbose {
        let m = sim.paths().metrics();
        println!(
            "  paths: {} computed, {} hierarchical, {} fallbacks, avg {:.3}ms",
            m.computed, m.hierarchical, m.hierarchy_fallbacks, m.average_search_ms
        );
    }
    results
}

fn run_until_resolved(sim: &mut Simulation, clock: &ManualClock, id: PathRequestId) {
    for _ in 0..120 {
        if sim.path_status(id) != Some(PathStatus::Pending) {
            return;
        }
        clock.advance(FRAME);
        sim.tick(FRAME as f32);
    }
}

fn path_length(waypoints: &[Vec3]) -> f32 {
    waypoints.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

// ── 4. Scheduling ───────────────────────────────────────────────────────

fn validate_scheduler(config: &SubsystemConfig) -> Vec<TestResult> {
    println!("--- Scheduling ---");
    let mut results = Vec::new();
    let clock = ManualClock::new();
    let mut sim = Simulation::new(config.clone(), clock.shared());

    // Dependency chain: second waits for first, even at higher priority.
    let first = sim.add_task(
        TaskSpec::from_fn(
            |_: &mut Systems| -> Result<(), TaskError> { Ok(()) },
            Priority::Low,
        )
        .category("harness"),
    );
    let second = sim.add_task(
        TaskSpec::from_fn(
            |_: &mut Systems| -> Result<(), TaskError> { Ok(()) },
            Priority::Critical,
        )
        .category("harness"),
    );
    let linked = match (first, second) {
        (Some(a), Some(b)) => sim.set_task_dependency(b, a),
        _ => false,
    };
    let mut second_done_before_first = false;
    for _ in 0..10 {
        clock.advance(FRAME);
        sim.tick(FRAME as f32);
        if let (Some(a), Some(b)) = (first, second) {
            if sim.task_status(b) == Some(TaskStatus::Completed)
                && sim.task_status(a) != Some(TaskStatus::Completed)
            {
                second_done_before_first = true;
            }
        }
    }
    let both_done = [first, second]
        .iter()
        .all(|id| id.and_then(|id| sim.task_status(id)) == Some(TaskStatus::Completed));
    results.push(TestResult::new(
        "dependencies_respected",
        linked && both_done && !second_done_before_first,
        format!("linked {}, both done {}", linked, both_done),
    ));

    // A failing task is retried up to its attempt limit.
    let failing = sim.add_task(
        TaskSpec::from_fn(
            |_: &mut Systems| -> Result<(), TaskError> { Err(TaskError::failed("always")) },
            Priority::Normal,
        )
        .max_attempts(3),
    );
    for _ in 0..5 {
        clock.advance(FRAME);
        sim.tick(FRAME as f32);
    }
    let record = failing.and_then(|id| sim.scheduler().task(id));
    results.push(TestResult::new(
        "retries_then_fails",
        record.is_some_and(|r| r.attempts() == 3)
            && failing.and_then(|id| sim.task_status(id)) == Some(TaskStatus::Failed),
        format!("{:?}", failing.and_then(|id| sim.task_status(id))),
    ));

    // Memory pressure switches the controller into emergency mode.
    sim.report_memory_usage(config.scheduler.memory_critical_mb + 1.0);
    clock.advance(config.scheduler.adaptive_interval + FRAME);
    sim.tick(FRAME as f32);
    let metrics = sim.scheduler().metrics();
    results.push(TestResult::new(
        "memory_pressure_degrades",
        metrics.emergency_mode,
        format!("multiplier {:.2}", metrics.adaptive_multiplier),
    ));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Options::command().debug_assert();
    }

    #[test]
    fn defaults_without_arguments() {
        let options = Options::try_parse_from(["framegrid-simtest"]).unwrap();
        assert!(!options.verbose);
        assert!(options.config_path.is_none());
        assert_eq!(options.seed, 42);
        assert_eq!(options.bodies, 400);
        assert_eq!(options.frames, 300);
    }

    #[test]
    fn values_are_parsed() {
        let options = Options::try_parse_from([
            "framegrid-simtest",
            "--verbose",
            "--config",
            "tuning.json",
            "--seed",
            "7",
            "--frames",
            "600",
        ])
        .unwrap();
        assert!(options.verbose);
        assert_eq!(options.config_path, Some(PathBuf::from("tuning.json")));
        assert_eq!(options.seed, 7);
        assert_eq!(options.frames, 600);
    }

    #[test]
    fn malformed_or_unknown_arguments_are_rejected() {
        assert!(Options::try_parse_from(["framegrid-simtest", "--seed", "abc"]).is_err());
        assert!(Options::try_parse_from(["framegrid-simtest", "--frames"]).is_err());
        assert!(Options::try_parse_from(["framegrid-simtest", "--speed", "2"]).is_err());
    }
}
