use versa::errors::{ErrorKind, VersaError};
use versa::store::{Record, RecordId, RecordStoreProvider};
use versa::transaction::{ScopeRole, TransactionConfig, TransactionState};
use versa_int_test::service::{User, RUNTIME};
use versa_int_test::test_util::{cleanup, create_test_context, run_test};

#[test]
fn test_requires_new_survives_outer_rollback() {
    run_test(
        create_test_context,
        |ctx| {
            let user_a = User::new("alice", "alice@example.com");
            let user_b = User::new("bob", "bob@example.com");

            let err = ctx
                .service()
                .nested_transaction_example(user_a, user_b, true)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::domain(RUNTIME));

            // A took id 1 in the outer context, B id 2 in the inner one
            assert!(!ctx.users().contains(RecordId::new(1))?);
            let b = ctx.users().get(RecordId::new(2))?;
            assert_eq!(b.data().username, "bob");
            assert_eq!(ctx.users().count()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_requires_new_and_outer_both_commit() {
    run_test(
        create_test_context,
        |ctx| {
            ctx.service()
                .nested_transaction_example(User::generate(), User::generate(), false)?;
            assert_eq!(ctx.users().count()?, 2);

            let stats = ctx.coordinator().stats();
            assert_eq!(stats.begun, 2);
            assert_eq!(stats.committed, 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_requires_new_suspends_caller() {
    run_test(
        create_test_context,
        |ctx| {
            let outer = ctx.coordinator().begin(&TransactionConfig::required(), None)?;
            let inner = ctx
                .coordinator()
                .begin(&TransactionConfig::requires_new(), Some(outer.context()))?;

            assert!(inner.is_owner());
            assert_ne!(inner.context(), outer.context());
            assert!(!inner.context().is_nested());
            assert_eq!(inner.context().suspended(), Some(outer.context()));

            ctx.users()
                .bind(inner.context())
                .save(Record::new(User::generate()))?;
            ctx.coordinator().complete(inner, Ok(()))?;

            // the outer context does not see the inner write as its own,
            // but reads the now committed state
            let outer_users = ctx.users().bind(outer.context());
            assert_eq!(outer_users.count()?, 1);
            assert_eq!(ctx.users().pending_writes(outer.context()), 0);
            ctx.coordinator().complete(outer, Ok(()))?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_required_joins_active_caller() {
    run_test(
        create_test_context,
        |ctx| {
            let outer = ctx.coordinator().begin(&TransactionConfig::required(), None)?;
            let joined = ctx
                .coordinator()
                .begin(&TransactionConfig::required(), Some(outer.context()))?;

            assert_eq!(joined.role(), ScopeRole::Participant);
            assert_eq!(joined.context(), outer.context());

            ctx.users()
                .bind(joined.context())
                .save(Record::new(User::generate()))?;
            ctx.coordinator().complete(joined, Ok(()))?;

            // nothing is visible until the owner completes
            assert_eq!(ctx.users().count()?, 0);
            ctx.coordinator().complete(outer, Ok(()))?;
            assert_eq!(ctx.users().count()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_participant_marks_outer_rollback_only() {
    run_test(
        create_test_context,
        |ctx| {
            let result: Result<(), VersaError> =
                ctx.coordinator()
                    .execute(&TransactionConfig::required(), None, |outer| {
                        ctx.users().bind(outer).save(Record::new(User::generate()))?;

                        let inner = ctx.coordinator().execute(
                            &TransactionConfig::required(),
                            Some(outer),
                            |_| -> Result<(), VersaError> {
                                Err(VersaError::domain(RUNTIME, "inner failure"))
                            },
                        );
                        assert!(inner.is_err());
                        assert!(outer.is_rollback_only());

                        // swallowing the inner error does not save the outer unit-of-work
                        Ok(())
                    });

            assert_eq!(result.unwrap_err().kind(), &ErrorKind::UnexpectedRollback);
            assert_eq!(ctx.users().count()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nested_child_rollback_keeps_parent_writes() {
    run_test(
        create_test_context,
        |ctx| {
            let kept = ctx.service().savepoint_example(
                User::new("first", "f@example.com"),
                User::new("second", "s@example.com"),
                true,
            )?;
            assert!(!kept);

            let users = ctx.users().find_all()?;
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].data().username, "first");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nested_child_commit_merges_into_parent() {
    run_test(
        create_test_context,
        |ctx| {
            assert!(ctx
                .service()
                .savepoint_example(User::generate(), User::generate(), false)?);
            assert_eq!(ctx.users().count()?, 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nested_child_commit_discarded_with_parent() {
    run_test(
        create_test_context,
        |ctx| {
            let result: Result<(), VersaError> =
                ctx.coordinator()
                    .execute(&TransactionConfig::required(), None, |outer| {
                        ctx.users().bind(outer).save(Record::new(User::generate()))?;

                        ctx.coordinator()
                            .execute(&TransactionConfig::nested(), Some(outer), |child| {
                                assert!(child.is_nested());
                                ctx.users().bind(child).save(Record::new(User::generate()))?;
                                Ok(())
                            })?;

                        // the committed child is now part of the parent
                        assert_eq!(ctx.users().pending_writes(outer), 2);
                        Err(VersaError::domain(RUNTIME, "outer failure"))
                    });

            assert!(result.is_err());
            assert_eq!(ctx.users().count()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nested_without_caller_starts_root() {
    run_test(
        create_test_context,
        |ctx| {
            let scope = ctx.coordinator().begin(&TransactionConfig::nested(), None)?;
            assert!(scope.is_owner());
            assert!(!scope.context().is_nested());

            let context = scope.context().clone();
            ctx.coordinator().complete(scope, Ok(()))?;
            assert_eq!(context.state(), TransactionState::Committed);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_resolved_context_rejects_operations() {
    run_test(
        create_test_context,
        |ctx| {
            let scope = ctx.coordinator().begin(&TransactionConfig::required(), None)?;
            let context = scope.context().clone();
            ctx.coordinator().complete(scope, Ok(()))?;

            let err = ctx
                .users()
                .bind(&context)
                .save(Record::new(User::generate()))
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InactiveContext);

            let err = ctx.users().bind(&context).count().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InactiveContext);
            assert_eq!(ctx.users().count()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_dropped_scope_rolls_back() {
    run_test(
        create_test_context,
        |ctx| {
            let context = {
                let scope = ctx.coordinator().begin(&TransactionConfig::required(), None)?;
                ctx.users()
                    .bind(scope.context())
                    .save(Record::new(User::generate()))?;
                scope.context().clone()
            };

            assert_eq!(context.state(), TransactionState::RolledBack);
            assert_eq!(ctx.users().count()?, 0);
            assert!(!ctx.users().is_tracking(&context));
            Ok(())
        },
        cleanup,
    )
}
