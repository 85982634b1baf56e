use super::{aggregate, counters_suspicious, geometric_mean, verify_integrity};
use crate::plan::{self, ExplicitEntry, Mode, PlanInput};
use crate::registry::Registry;
use crate::shared::SharedPlane;

fn two_entry_plan() -> (Registry, plan::RunList) {
    let registry = Registry::builtin();
    let input = PlanInput {
        explicit: vec![
            ExplicitEntry {
                name: "cpu".into(),
                instances: 2,
                ops: 0,
            },
            ExplicitEntry {
                name: "vm".into(),
                instances: 1,
                ops: 0,
            },
        ],
        class_filter: None,
        mode: Mode::ExplicitOnly,
        with: vec![],
        exclude: vec![],
        allow_pathological: false,
        default_ops: 0,
        seed: 0,
    };
    let plan = plan::build(&registry, &input).unwrap();
    (registry, plan)
}

/// Fakes a completed worker the way a child would have left it.
fn fill_slot(shared: &SharedPlane, idx: usize, counter: u64, duration: f64, utime: f64) {
    let slot = unsafe { shared.slot_mut(idx) };
    slot.pid = -(1000 + idx as i32);
    slot.completed = true;
    slot.ci.counter = counter;
    slot.ci.run_ok = true;
    slot.ci.counter_ready = true;
    slot.counter_total = counter;
    slot.duration_total = duration;
    slot.utime_total = utime;
    slot.stime_total = utime / 2.0;
    slot.maxrss_kb = 1000 + idx as i64;
    let checksum = unsafe { shared.checksum_mut(idx) };
    checksum.finalise(&slot.ci);
}

fn assign_ranges(plan: &mut plan::RunList) {
    let mut offset = 0;
    for entry in &mut plan.entries {
        if entry.runnable() {
            entry.stats_range = offset..offset + entry.num_instances as usize;
            offset = entry.stats_range.end;
        }
    }
}

#[test]
fn aggregation_sums_and_rates() {
    let (_registry, mut plan) = two_entry_plan();
    assign_ranges(&mut plan);
    let shared = SharedPlane::new(3).unwrap();
    fill_slot(&shared, 0, 100, 2.0, 1.0);
    fill_slot(&shared, 1, 300, 4.0, 1.0);
    fill_slot(&shared, 2, 50, 1.0, 0.5);
    plan.entries[0].completed = 2;
    plan.entries[1].completed = 1;

    let reports = aggregate(&plan, &shared);
    assert_eq!(reports.len(), 2);

    let cpu = &reports[0];
    assert_eq!(cpu.name, "cpu");
    assert_eq!(cpu.bogo_ops, 400);
    // Arithmetic mean of 2s and 4s.
    assert!((cpu.wall_secs - 3.0).abs() < 1e-9);
    assert!((cpu.user_secs - 2.0).abs() < 1e-9);
    assert!((cpu.system_secs - 1.0).abs() < 1e-9);
    assert!((cpu.ops_per_sec_real - 400.0 / 3.0).abs() < 1e-9);
    assert!((cpu.ops_per_sec_cpu - 400.0 / 3.0).abs() < 1e-9);
    // 100 * (u+s) / wall / instances = 100 * 3 / 3 / 2.
    assert!((cpu.cpu_usage_pct - 50.0).abs() < 1e-9);
    assert_eq!(cpu.maxrss_kb, 1001);

    let vm = &reports[1];
    assert_eq!(vm.bogo_ops, 50);
    assert!((vm.wall_secs - 1.0).abs() < 1e-9);
}

#[test]
fn aggregation_geometric_means_aux_metrics() {
    let (_registry, mut plan) = two_entry_plan();
    assign_ranges(&mut plan);
    let shared = SharedPlane::new(3).unwrap();
    fill_slot(&shared, 0, 1, 1.0, 0.1);
    fill_slot(&shared, 1, 1, 1.0, 0.1);
    unsafe { shared.slot_mut(0) }.metrics[0].set("widgets per second", 2.0);
    unsafe { shared.slot_mut(1) }.metrics[0].set("widgets per second", 8.0);
    plan.entries[0].completed = 2;

    let reports = aggregate(&plan, &shared);
    let (desc, value) = &reports[0].aux[0];
    assert_eq!(desc, "widgets per second");
    assert!((value - 4.0).abs() < 1e-9);
}

#[test]
fn integrity_passes_then_catches_tampering() {
    let (_registry, mut plan) = two_entry_plan();
    assign_ranges(&mut plan);
    let shared = SharedPlane::new(3).unwrap();
    for i in 0..3 {
        fill_slot(&shared, i, 10 + i as u64, 1.0, 0.1);
    }
    assert!(verify_integrity(&mut plan, &shared));

    // A wild write into the stats area after the worker finalised.
    unsafe { shared.slot_mut(1) }.ci.counter ^= 0x40;
    assert!(!verify_integrity(&mut plan, &shared));
    assert!(plan.entries[0].status_count(crate::plan::StatusKind::BadMetrics) > 0);
}

#[test]
fn suspicious_only_when_idle_and_long() {
    let (_registry, mut plan) = two_entry_plan();
    assign_ranges(&mut plan);

    // Zero counters but long durations: suspicious.
    let shared = SharedPlane::new(3).unwrap();
    for i in 0..3 {
        fill_slot(&shared, i, 0, 60.0, 0.1);
    }
    assert!(counters_suspicious(&plan, &shared));

    // Zero counters over a short run: fine.
    let shared = SharedPlane::new(3).unwrap();
    for i in 0..3 {
        fill_slot(&shared, i, 0, 1.0, 0.1);
    }
    assert!(!counters_suspicious(&plan, &shared));

    // Any nonzero counter: fine.
    let shared = SharedPlane::new(3).unwrap();
    for i in 0..3 {
        fill_slot(&shared, i, 5, 60.0, 0.1);
    }
    assert!(!counters_suspicious(&plan, &shared));
}

#[test]
fn geometric_mean_basics() {
    assert_eq!(geometric_mean(&[]), 0.0);
    assert!((geometric_mean(&[4.0]) - 4.0).abs() < 1e-12);
    assert!((geometric_mean(&[2.0, 8.0]) - 4.0).abs() < 1e-12);
    assert!((geometric_mean(&[1.0, 10.0, 100.0]) - 10.0).abs() < 1e-9);
    // A zero sample zeroes the mean.
    assert_eq!(geometric_mean(&[5.0, 0.0]), 0.0);
}

#[test]
fn geometric_mean_survives_magnitudes_that_overflow_naively() {
    // The naive product of these is inf; the decomposed accumulation
    // must not be.
    let huge = [1e300, 1e300, 1e300, 1e300];
    let gm = geometric_mean(&huge);
    assert!((gm / 1e300 - 1.0).abs() < 1e-9);

    let tiny = [1e-300, 1e-300, 1e-300, 1e-300];
    let gm = geometric_mean(&tiny);
    assert!((gm / 1e-300 - 1.0).abs() < 1e-9);

    let mixed = [1e300, 1e-300];
    let gm = geometric_mean(&mixed);
    assert!((gm - 1.0).abs() < 1e-9);
}
