use super::aux_key;

#[test]
fn aux_keys_munge_like_the_report_expects() {
    assert_eq!(aux_key("million sqrt operations"), "million-sqrt-operations");
    assert_eq!(aux_key("Datagrams Per Second"), "datagrams-per-second");
    assert_eq!(aux_key("I/O (read %)"), "io-read-");
}

#[test]
fn aux_keys_cap_at_forty_chars() {
    let long = "a very long auxiliary metric description that keeps going";
    assert_eq!(aux_key(long).len(), 40);
}
