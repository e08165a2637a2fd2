use std::io::Write;

use smsgate_client::state_file::{
    FileRepository, MAX_STATE_FILE_BYTES, STATE_FILE_NAME, StateFileError, load_state_from_path,
    save_state_to_path,
};
use smsgate_core::{ActivationRecord, ActivationRepository, ActivationState, StoreError};

#[test]
fn missing_file_loads_unactivated_record() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let repo = FileRepository::in_dir(dir.path());

    assert_eq!(repo.load().expect("load"), ActivationRecord::default());
    assert!(!repo.is_activated().expect("is_activated"));
}

#[test]
fn activation_survives_reopen() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let nested = dir.path().join("state");

    FileRepository::in_dir(&nested)
        .record_activation("DEV-ABC", "Dana")
        .expect("record activation");

    let reopened = FileRepository::in_dir(&nested);
    assert_eq!(reopened.path(), nested.join(STATE_FILE_NAME));
    assert_eq!(
        reopened.activation_state().expect("state"),
        ActivationState::Activated {
            device_id: "DEV-ABC".to_owned(),
            user_name: "Dana".to_owned(),
        }
    );
    assert!(
        !nested.join("activation_state.json.tmp").exists(),
        "temporary file should be renamed into place"
    );
}

#[test]
fn reset_clears_all_keys_on_disk() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let repo = FileRepository::in_dir(dir.path());
    repo.record_activation("DEV-ABC", "Dana").expect("record");
    repo.set_service_paused(true).expect("pause");

    repo.reset().expect("reset");
    repo.reset().expect("second reset");

    let raw = std::fs::read_to_string(repo.path()).expect("read state file");
    assert!(!raw.contains("device_id"), "unexpected contents: {raw}");
    assert!(!raw.contains("user_name"), "unexpected contents: {raw}");
    assert_eq!(repo.load().expect("load"), ActivationRecord::default());
}

#[test]
fn load_state_ignores_oversized_file() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join(STATE_FILE_NAME);

    let mut file = std::fs::File::create(&path).expect("create state file");
    file.write_all(&vec![b'a'; (MAX_STATE_FILE_BYTES as usize) + 1024])
        .expect("write oversized state file");
    drop(file);

    let err = load_state_from_path(&path).expect_err("oversized file should error");
    let msg = err.to_string();
    assert!(msg.contains("too large"), "unexpected error: {msg}");
}

#[test]
fn corrupt_file_is_a_load_error() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let repo = FileRepository::in_dir(dir.path());
    std::fs::write(repo.path(), b"{ not json").expect("write corrupt file");

    match repo.load() {
        Err(StoreError::Load(msg)) => assert!(msg.contains("invalid state JSON"), "{msg}"),
        other => panic!("expected load error, got {other:?}"),
    }
}

#[test]
fn failed_save_keeps_previous_record() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let repo = FileRepository::in_dir(dir.path());
    repo.record_activation("DEV-ABC", "Dana").expect("record");

    // A directory squatting on the staging path makes every write fail.
    std::fs::create_dir(repo.path().with_extension("json.tmp")).expect("block staging path");

    let err = repo.set_service_paused(true).expect_err("save should fail");
    assert!(matches!(err, StoreError::Save(_)), "{err:?}");

    let record = repo.load().expect("previous record still readable");
    assert!(record.activated);
    assert!(!record.service_paused);
    assert_eq!(record.device_id.as_deref(), Some("DEV-ABC"));
}

#[test]
fn save_replaces_existing_record() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join(STATE_FILE_NAME);

    let first = ActivationRecord {
        activated: true,
        device_id: Some("DEV-OLD".to_owned()),
        user_name: Some("Dana".to_owned()),
        ..ActivationRecord::default()
    };
    save_state_to_path(&path, &first).expect("first save");

    let second = ActivationRecord {
        device_id: Some("DEV-NEW".to_owned()),
        ..first
    };
    save_state_to_path(&path, &second).expect("second save");

    assert_eq!(load_state_from_path(&path).expect("load"), second);
}

#[test]
fn failed_rename_removes_staged_file() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join(STATE_FILE_NAME);
    std::fs::create_dir(&path).expect("directory in place of the state file");
    std::fs::write(path.join("occupied"), b"x").expect("fill directory");

    let err = save_state_to_path(&path, &ActivationRecord::default())
        .expect_err("rename onto a directory fails");
    assert!(matches!(err, StateFileError::Rename(_)), "{err:?}");
    assert!(!path.with_extension("json.tmp").exists());
}
