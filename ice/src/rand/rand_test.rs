use super::*;

#[test]
fn test_credential_lengths() {
    assert_eq!(generate_ufrag().len(), LEN_UFRAG);
    assert_eq!(generate_pwd().len(), LEN_PWD);
    assert!(generate_ufrag().len() * 6 >= 24, "ufrag entropy too small");
    assert!(generate_pwd().len() * 5 >= 110, "pwd entropy too small");
}

#[test]
fn test_credentials_are_not_repeated() {
    // a collision here would mean the generator is broken outright
    let a = generate_pwd();
    let b = generate_pwd();
    assert_ne!(a, b);

    let t1 = generate_tie_breaker();
    let t2 = generate_tie_breaker();
    assert_ne!(t1, t2);
}
