use versa::errors::ErrorKind;
use versa::store::{Record, RecordStoreProvider};
use versa::transaction::{Isolation, TransactionConfig};
use versa_int_test::service::User;
use versa_int_test::test_util::{cleanup, create_test_context, insert_test_users, run_test};

#[test]
fn test_read_only_save_fails_and_count_unchanged() {
    run_test(
        create_test_context,
        |ctx| {
            insert_test_users(&ctx, 2)?;
            let before = ctx.users().count()?;

            let err = ctx.service().create_user_read_only(User::generate()).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ReadOnlyViolation);
            assert_eq!(ctx.users().count()?, before);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_read_only_reads_everything() {
    run_test(
        create_test_context,
        |ctx| {
            insert_test_users(&ctx, 3)?;
            let users = ctx.service().all_users_read_only()?;
            assert_eq!(users.len(), 3);
            assert_eq!(ctx.service().active_user_report()?, 3);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_reporting_preset() {
    let config = TransactionConfig::read_only_reporting();
    assert!(config.is_read_only());
    assert_eq!(config.isolation(), Isolation::ReadCommitted);
    assert_eq!(config.timeout().map(|t| t.as_secs()), Some(20));
}

#[test]
fn test_nested_child_of_read_only_parent_is_read_only() {
    run_test(
        create_test_context,
        |ctx| {
            let result = ctx
                .coordinator()
                .execute(&TransactionConfig::read_only(), None, |outer| {
                    ctx.coordinator()
                        .execute(&TransactionConfig::nested(), Some(outer), |child| {
                            assert!(child.is_read_only());
                            ctx.users().bind(child).save(Record::new(User::generate()))
                        })
                });

            assert_eq!(result.unwrap_err().kind(), &ErrorKind::ReadOnlyViolation);
            assert_eq!(ctx.users().count()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_coordinator_read_only_check() {
    run_test(
        create_test_context,
        |ctx| {
            let scope = ctx.coordinator().begin(&TransactionConfig::read_only(), None)?;
            let err = ctx.coordinator().check_read_only(scope.context()).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ReadOnlyViolation);
            ctx.coordinator().complete(scope, Ok(()))?;

            let scope = ctx.coordinator().begin(&TransactionConfig::required(), None)?;
            assert!(ctx.coordinator().check_read_only(scope.context()).is_ok());
            ctx.coordinator().complete(scope, Ok(()))?;
            Ok(())
        },
        cleanup,
    )
}
