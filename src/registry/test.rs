use super::{Class, Registry};

#[test]
fn ids_are_unique_and_nonzero() {
    let registry = Registry::builtin();
    let mut ids: Vec<u32> = registry.entries().iter().map(|d| d.id).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before);
    assert!(ids.iter().all(|&id| id > 0));
}

#[test]
fn lookup_by_id_and_name_agree() {
    let registry = Registry::builtin();
    for desc in registry.entries() {
        let by_id = registry.by_id(desc.id).unwrap();
        let (_, by_name) = registry.by_name(desc.name).unwrap();
        assert_eq!(by_id.id, by_name.id);
    }
    assert!(registry.by_id(0).is_none());
}

#[test]
fn name_lookup_munges_case_and_separators() {
    let registry = Registry::builtin();
    assert!(registry.by_name("CPU").is_some());
    assert!(registry.by_name("Mem-Cpy").is_some());
    assert!(registry.by_name("mem_cpy").is_some());
    assert!(registry.by_name("nonesuch").is_none());
}

#[test]
fn class_parse_and_members() {
    assert_eq!(Class::parse("cpu"), Some(Class::CPU));
    assert_eq!(Class::parse("CPU-Cache"), Some(Class::CPU_CACHE));
    assert_eq!(Class::parse("pipe"), Some(Class::PIPE_IO));
    assert_eq!(Class::parse("bogus"), None);

    let registry = Registry::builtin();
    let members = registry.class_members(Class::CPU);
    assert!(members.contains(&"cpu"));
    let path = registry.class_members(Class::PATHOLOGICAL);
    assert_eq!(path, vec!["fork"]);
}

#[test]
fn every_entry_declares_a_class() {
    let registry = Registry::builtin();
    for desc in registry.entries() {
        assert!(!desc.class.is_empty(), "{}", desc.name);
        assert!(!desc.help.is_empty(), "{}", desc.name);
    }
}
