use plan_autostart::error::AutostartError;
use plan_autostart::lock;

#[test]
fn lock_acquire_and_release() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = dir.path().join(".autostart");

    let guard = lock::try_acquire_batch(&runtime, "batch-1").unwrap();

    let pid_path = lock::pid_path(&runtime, "batch-1");
    let pid_contents = std::fs::read_to_string(&pid_path).unwrap();
    assert_eq!(
        pid_contents.trim().parse::<u32>().unwrap(),
        std::process::id()
    );

    drop(guard);
    assert!(!pid_path.exists());
}

#[test]
fn lock_prevents_second_driver_for_same_batch() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = dir.path().join(".autostart");

    let _guard = lock::try_acquire_batch(&runtime, "batch-1").unwrap();

    let err = lock::try_acquire_batch(&runtime, "batch-1").unwrap_err();
    assert!(matches!(err, AutostartError::LockHeld(_)));
    assert!(err.is_user_error());
    assert!(
        err.to_string().contains("already being driven by another process"),
        "{}",
        err
    );
}

#[test]
fn different_batches_lock_independently() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = dir.path().join(".autostart");

    let _a = lock::try_acquire_batch(&runtime, "batch-a").unwrap();
    let _b = lock::try_acquire_batch(&runtime, "batch-b").unwrap();
}

#[test]
fn stale_pid_file_does_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = dir.path().join(".autostart");
    let pid_path = lock::pid_path(&runtime, "batch-1");
    std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    std::fs::write(&pid_path, "99999999").unwrap();

    let guard = lock::try_acquire_batch(&runtime, "batch-1").unwrap();
    assert_eq!(
        std::fs::read_to_string(&pid_path).unwrap().trim(),
        std::process::id().to_string()
    );
    drop(guard);
}
