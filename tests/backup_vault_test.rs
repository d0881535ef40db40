mod common;

use common::{TestEnvironment, TEST_ADDRESS, TEST_MNEMONIC};
use wallet_engine::{BackupVault, EngineError, EventBus, SeedSource};

#[test]
fn wrong_password_fails_closed_and_keeps_existing_accounts() {
    let env = TestEnvironment::new().unwrap();
    env.engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();
    let backup = env.engine.save_vault("password-one").unwrap();

    let target = TestEnvironment::new().unwrap();
    let existing = target.engine.create_account(None, "Existing", vec![]).unwrap();

    let result = target.engine.restore_backup(&backup, "password-two");
    assert!(matches!(result, Err(EngineError::DecryptionFailure)));
    let accounts = target.engine.list_accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].address, existing.address);
}

#[test]
fn restore_replaces_the_store_wholesale() {
    let env = TestEnvironment::new().unwrap();
    env.engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();
    env.engine.create_account(None, "Second", vec![]).unwrap();
    let backup = env.engine.save_vault("pw").unwrap();

    let target = TestEnvironment::new().unwrap();
    target.engine.create_account(None, "Old", vec![]).unwrap();
    let count = target.engine.restore_backup(&backup, "pw").unwrap();
    assert_eq!(count, 2);

    let accounts = target.engine.list_accounts();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].address.as_str(), TEST_ADDRESS);
    assert!(!accounts.iter().any(|a| a.display_name == "Old"));
}

#[test]
fn unlock_requires_the_original_password() {
    let env = TestEnvironment::new().unwrap();
    env.engine
        .create_account(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
        .unwrap();
    env.engine.save_vault("correct horse").unwrap();

    let reopened = env.reopen().unwrap();
    assert!(matches!(
        reopened.unlock("battery staple"),
        Err(EngineError::DecryptionFailure)
    ));
    assert!(reopened.list_accounts().is_empty());

    assert_eq!(reopened.unlock("correct horse").unwrap(), 1);
}

#[test]
fn raw_key_accounts_survive_the_round_trip() {
    let store = wallet_engine::AccountStore::new();
    store
        .create(
            Some(SeedSource::PrivateKey(
                "0x4c0883a69102937d6231471b5dbb6204fe512961708279feb1be6ae5538da033".to_string(),
            )),
            "Raw",
            vec!["polygon".to_string()],
        )
        .unwrap();
    let events = EventBus::new();
    let backup = BackupVault::create(&store, "pw", &events).unwrap();

    let fresh = wallet_engine::AccountStore::new();
    BackupVault::restore(&fresh, &backup, "pw").unwrap();
    let restored = fresh.list();
    assert_eq!(restored[0].network_keys, vec!["polygon"]);
    assert_eq!(restored[0].address, store.list()[0].address);
}
