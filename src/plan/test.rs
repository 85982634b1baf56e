use super::{build, ExplicitEntry, IgnoreRun, Mode, PlanInput};
use crate::error::Error;
use crate::registry::{Class, Registry};

fn input(mode: Mode) -> PlanInput {
    PlanInput {
        explicit: vec![],
        class_filter: None,
        mode,
        with: vec![],
        exclude: vec![],
        allow_pathological: false,
        default_ops: 0,
        seed: 42,
    }
}

fn explicit(name: &str, instances: i32) -> ExplicitEntry {
    ExplicitEntry {
        name: name.to_string(),
        instances,
        ops: 0,
    }
}

#[test]
fn explicit_mentions_seed_the_list_in_order() {
    let registry = Registry::builtin();
    let mut input = input(Mode::ExplicitOnly);
    input.explicit = vec![explicit("vm", 1), explicit("cpu", 2)];
    let plan = build(&registry, &input).unwrap();

    assert_eq!(plan.entries.len(), 2);
    assert_eq!(plan.entries[0].name, "vm");
    assert_eq!(plan.entries[0].num_instances, 1);
    assert_eq!(plan.entries[1].name, "cpu");
    assert_eq!(plan.entries[1].num_instances, 2);
    assert_eq!(plan.total_instances(), 3);
}

#[test]
fn unknown_stressor_lists_valid_names() {
    let registry = Registry::builtin();
    let mut input = input(Mode::ExplicitOnly);
    input.explicit = vec![explicit("warpdrive", 1)];
    match build(&registry, &input) {
        Err(Error::UnknownStressor { name, valid }) => {
            assert_eq!(name, "warpdrive");
            assert!(valid.contains("cpu"));
            assert!(valid.contains("memcpy"));
        }
        other => panic!("expected UnknownStressor, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn name_munging_accepts_either_separator() {
    let registry = Registry::builtin();
    let mut input = input(Mode::ExplicitOnly);
    input.explicit = vec![explicit("MEM-CPY", 1)];
    let plan = build(&registry, &input).unwrap();
    assert_eq!(plan.entries[0].name, "memcpy");
}

#[test]
fn plan_is_deterministic_for_a_seed() {
    let registry = Registry::builtin();
    let mut a = input(Mode::Random(20));
    a.seed = 7;
    let mut b = input(Mode::Random(20));
    b.seed = 7;

    let plan_a = build(&registry, &a).unwrap();
    let plan_b = build(&registry, &b).unwrap();
    let counts_a: Vec<_> = plan_a.entries.iter().map(|e| e.num_instances).collect();
    let counts_b: Vec<_> = plan_b.entries.iter().map(|e| e.num_instances).collect();
    assert_eq!(counts_a, counts_b);
}

#[test]
fn random_produces_exactly_n_instances() {
    let registry = Registry::builtin();
    for seed in 0..32 {
        let mut i = input(Mode::Random(13));
        i.seed = seed;
        let plan = build(&registry, &i).unwrap();
        let total: u32 = plan.entries.iter().map(|e| e.num_instances).sum();
        assert_eq!(total, 13, "seed {}", seed);
    }
}

#[test]
fn random_rejects_explicit_mentions() {
    let registry = Registry::builtin();
    let mut i = input(Mode::Random(4));
    i.explicit = vec![explicit("cpu", 1)];
    assert!(matches!(build(&registry, &i), Err(Error::RandomWithExplicit)));
}

#[test]
fn class_filter_zeroes_but_keeps_entries() {
    let registry = Registry::builtin();
    let mut i = input(Mode::Parallel(1));
    i.class_filter = Some(Class::NETWORK);
    let plan = build(&registry, &i).unwrap();

    // Every catalog entry is still in the list.
    assert_eq!(plan.entries.len(), registry.entries().len());
    for entry in &plan.entries {
        let is_network = registry.entries()[entry.desc].class.intersects(Class::NETWORK);
        if is_network {
            assert_eq!(entry.num_instances, 1, "{}", entry.name);
        } else {
            assert_eq!(entry.num_instances, 0, "{}", entry.name);
            assert_eq!(entry.ignore_run, IgnoreRun::NotIgnored, "{}", entry.name);
        }
    }
}

#[test]
fn class_filter_requires_a_multi_select_mode() {
    let registry = Registry::builtin();
    let mut i = input(Mode::ExplicitOnly);
    i.class_filter = Some(Class::CPU);
    i.explicit = vec![explicit("cpu", 1)];
    assert!(matches!(build(&registry, &i), Err(Error::ClassWithoutMode)));
}

#[test]
fn with_list_restricts_selection() {
    let registry = Registry::builtin();
    let mut i = input(Mode::Sequential(2));
    i.with = vec!["cpu".to_string(), "pipe".to_string()];
    let plan = build(&registry, &i).unwrap();

    assert_eq!(plan.runnable_count(), 2);
    for entry in plan.entries.iter().filter(|e| e.runnable()) {
        assert!(entry.name == "cpu" || entry.name == "pipe");
        assert_eq!(entry.num_instances, 2);
    }
}

#[test]
fn pathological_entries_need_the_gate() {
    let registry = Registry::builtin();
    let gated = build(&registry, &input(Mode::Parallel(1))).unwrap();
    let fork_entry = gated.entries.iter().find(|e| e.name == "fork").unwrap();
    assert_eq!(fork_entry.ignore_run, IgnoreRun::Excluded);

    let mut open = input(Mode::Parallel(1));
    open.allow_pathological = true;
    let open = build(&registry, &open).unwrap();
    let fork_entry = open.entries.iter().find(|e| e.name == "fork").unwrap();
    assert_eq!(fork_entry.ignore_run, IgnoreRun::NotIgnored);
}

#[test]
fn excluded_entries_never_run() {
    let registry = Registry::builtin();
    let mut i = input(Mode::Parallel(1));
    i.exclude = vec!["cpu".to_string()];
    let plan = build(&registry, &i).unwrap();
    let cpu = plan.entries.iter().find(|e| e.name == "cpu").unwrap();
    assert_eq!(cpu.ignore_run, IgnoreRun::Excluded);
    assert!(!cpu.runnable());
}

#[test]
fn unknown_exclude_is_a_hard_fail() {
    let registry = Registry::builtin();
    let mut i = input(Mode::Parallel(1));
    i.exclude = vec!["warpdrive".to_string()];
    assert!(matches!(
        build(&registry, &i),
        Err(Error::UnknownStressor { .. })
    ));
}

#[test]
fn zero_count_resolves_to_configured_cpus() {
    let registry = Registry::builtin();
    let mut i = input(Mode::ExplicitOnly);
    i.explicit = vec![explicit("cpu", 0), explicit("vm", -1)];
    let plan = build(&registry, &i).unwrap();
    // Both conventions resolve to at least one instance per CPU.
    assert!(plan.entries[0].num_instances >= 1);
    assert!(plan.entries[1].num_instances >= 1);
}
