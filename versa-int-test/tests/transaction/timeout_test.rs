use std::thread;
use std::time::Duration;
use versa::errors::ErrorKind;
use versa::store::{Record, RecordStoreProvider};
use versa::transaction::{TransactionConfig, TransactionCoordinator, TransactionState};
use versa_int_test::service::User;
use versa_int_test::test_util::{cleanup, create_test_context, insert_test_users, run_test};

#[test]
fn test_slow_unit_of_work_times_out() {
    run_test(
        create_test_context,
        |ctx| {
            let id = insert_test_users(&ctx, 1)?[0];
            let before = ctx.users().get(id)?;

            let err = ctx
                .service()
                .update_user_with_timeout(
                    id,
                    "late@example.com",
                    Duration::from_millis(100),
                    Duration::from_millis(150),
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Timeout);
            assert_eq!(ctx.users().get(id)?, before);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_fast_unit_of_work_commits() {
    run_test(
        create_test_context,
        |ctx| {
            let id = insert_test_users(&ctx, 1)?[0];
            let saved = ctx.service().update_user_with_timeout(
                id,
                "quick@example.com",
                Duration::from_secs(5),
                Duration::from_millis(10),
            )?;
            assert_eq!(saved.version(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_timeout_rolls_back_on_next_store_call() {
    run_test(
        create_test_context,
        |ctx| {
            let config = TransactionConfig::required().with_timeout(Duration::from_millis(100));
            let scope = ctx.coordinator().begin(&config, None)?;
            let context = scope.context().clone();
            let users = ctx.users().bind(&context);

            users.save(Record::new(User::generate()))?;
            assert_eq!(ctx.users().pending_writes(&context), 1);

            thread::sleep(Duration::from_millis(150));
            assert!(context.is_expired());
            // nothing happens until the context is touched again
            assert_eq!(context.state(), TransactionState::Active);

            let err = users.count().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Timeout);
            assert_eq!(context.state(), TransactionState::RolledBack);
            assert_eq!(ctx.users().pending_writes(&context), 0);

            let err = ctx.coordinator().complete(scope, Ok(())).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Timeout);
            assert_eq!(ctx.users().count()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_timeout_checked_at_completion() {
    run_test(
        create_test_context,
        |ctx| {
            let config = TransactionConfig::required().with_timeout(Duration::from_millis(100));
            let result = ctx.coordinator().execute(&config, None, |tx| {
                ctx.users().bind(tx).save(Record::new(User::generate()))?;
                thread::sleep(Duration::from_millis(150));
                Ok(())
            });

            assert_eq!(result.unwrap_err().kind(), &ErrorKind::Timeout);
            assert_eq!(ctx.users().count()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_explicit_enforce_timeout() {
    run_test(
        create_test_context,
        |ctx| {
            let config = TransactionConfig::required().with_timeout(Duration::from_millis(50));
            let scope = ctx.coordinator().begin(&config, None)?;
            assert!(ctx.coordinator().enforce_timeout(scope.context()).is_ok());

            thread::sleep(Duration::from_millis(80));
            let err = ctx.coordinator().enforce_timeout(scope.context()).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Timeout);
            assert_eq!(scope.context().state(), TransactionState::RolledBack);

            let err = ctx.coordinator().complete(scope, Ok(())).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Timeout);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_coordinator_default_timeout() {
    let coordinator = TransactionCoordinator::builder()
        .default_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let scope = coordinator.begin(&TransactionConfig::required(), None).unwrap();
    assert_eq!(scope.context().timeout(), Some(Duration::from_millis(50)));
    coordinator.complete(scope, Ok(())).unwrap();

    let own = TransactionConfig::required().with_timeout(Duration::from_secs(1));
    let scope = coordinator.begin(&own, None).unwrap();
    assert_eq!(scope.context().timeout(), Some(Duration::from_secs(1)));
    coordinator.complete(scope, Ok(())).unwrap();
}

#[test]
fn test_zero_timeout_is_rejected() {
    let err = TransactionCoordinator::builder()
        .default_timeout(Duration::ZERO)
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);

    let coordinator = TransactionCoordinator::new();
    let err = coordinator
        .begin(&TransactionConfig::required().with_timeout(Duration::ZERO), None)
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);
}
