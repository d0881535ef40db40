mod common;

use common::{TestEnvironment, TEST_ADDRESS, TEST_MNEMONIC};
use wallet_engine::{EngineError, SeedSource, WalletEvent};

#[test]
fn imported_mnemonic_derives_reference_address() {
    let env = TestEnvironment::new().unwrap();
    let account = env
        .engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();
    assert_eq!(account.address.as_str(), TEST_ADDRESS);
    assert!(account.system);
}

#[test]
fn derivation_is_deterministic_across_engines() {
    let env_a = TestEnvironment::new().unwrap();
    let env_b = TestEnvironment::new().unwrap();
    let a = env_a
        .engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "A", vec![])
        .unwrap();
    let b = env_b
        .engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "B", vec![])
        .unwrap();
    assert_eq!(a.address, b.address);
}

#[test]
fn invalid_seed_is_rejected_before_anything_is_stored() {
    let env = TestEnvironment::new().unwrap();
    let result = env.engine.create_account(
        Some(SeedSource::Mnemonic("not a real mnemonic at all".to_string())),
        "Bad",
        vec![],
    );
    assert!(matches!(result, Err(EngineError::InvalidSeed(_))));
    assert!(env.engine.list_accounts().is_empty());
}

#[test]
fn delete_rules_protect_last_and_system_accounts() {
    let env = TestEnvironment::new().unwrap();
    let system = env
        .engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();

    assert!(matches!(
        env.engine.delete_account(&system.address),
        Err(EngineError::LastAccount)
    ));

    let second = env.engine.create_account(None, "Second", vec![]).unwrap();
    assert!(matches!(
        env.engine.delete_account(&system.address),
        Err(EngineError::SystemAccount)
    ));
    env.engine.delete_account(&second.address).unwrap();
    assert_eq!(env.engine.list_accounts().len(), 1);
}

#[test]
fn metadata_changes_publish_events() {
    let env = TestEnvironment::new().unwrap();
    let account = env
        .engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();

    let mut rx = env.engine.events().subscribe();
    env.engine.rename_account(&account.address, "Renamed").unwrap();
    env.engine.hide_account(&account.address).unwrap();

    assert!(matches!(rx.try_recv(), Ok(WalletEvent::AccountUpdated { .. })));
    assert!(matches!(rx.try_recv(), Ok(WalletEvent::AccountUpdated { .. })));
    assert!(env.engine.list_visible_accounts().is_empty());
}

#[test]
fn logout_clears_accounts_but_keeps_disk_records() {
    let env = TestEnvironment::new().unwrap();
    env.engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();
    env.engine.save_vault("pass phrase").unwrap();

    env.engine.logout();
    assert!(env.engine.list_accounts().is_empty());

    // The vault survives and unlocks after a restart.
    let reopened = env.reopen().unwrap();
    let count = reopened.unlock("pass phrase").unwrap();
    assert_eq!(count, 1);
    assert_eq!(reopened.list_accounts()[0].address.as_str(), TEST_ADDRESS);
}
