use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use versa::errors::{ErrorKind, VersaError, VersaResult};
use versa::retry::RetryPolicy;
use versa::store::{Record, RecordStoreProvider};
use versa::transaction::TransactionConfig;
use versa_int_test::service::{User, ILLEGAL_ARGUMENT, RUNTIME};
use versa_int_test::test_util::{cleanup, create_test_context, insert_test_users, run_test};

fn runtime_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_name("flaky operation")
        .with_max_attempts(3)
        .with_delay(Duration::from_millis(10))
        .retry_for([ErrorKind::domain(RUNTIME)])
        .no_retry_for([ErrorKind::domain(ILLEGAL_ARGUMENT)])
}

#[test]
fn test_retries_exactly_max_attempts() {
    run_test(
        create_test_context,
        |ctx| {
            let attempts = AtomicU32::new(0);
            let result: VersaResult<()> = runtime_policy().run(|| {
                ctx.coordinator()
                    .execute(&TransactionConfig::requires_new(), None, |tx| {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        ctx.users().bind(tx).save(Record::new(User::generate()))?;
                        Err(VersaError::domain(RUNTIME, "flaky"))
                    })
            });

            assert_eq!(result.unwrap_err().kind(), &ErrorKind::domain(RUNTIME));
            assert_eq!(attempts.load(Ordering::SeqCst), 3);
            // every attempt rolled back
            assert_eq!(ctx.users().count()?, 0);
            assert_eq!(ctx.coordinator().stats().rolled_back, 3);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_non_retryable_kind_runs_once() {
    run_test(
        create_test_context,
        |ctx| {
            let attempts = AtomicU32::new(0);
            let result: VersaResult<()> = runtime_policy().run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(VersaError::domain(ILLEGAL_ARGUMENT, "bad input"))
            });

            assert_eq!(result.unwrap_err().kind(), &ErrorKind::domain(ILLEGAL_ARGUMENT));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_succeeds_after_transient_failures() {
    run_test(
        create_test_context,
        |ctx| {
            let attempts = AtomicU32::new(0);
            let saved = runtime_policy().run(|| {
                ctx.coordinator()
                    .execute(&TransactionConfig::required(), None, |tx| {
                        let saved = ctx.users().bind(tx).save(Record::new(User::generate()))?;
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            return Err(VersaError::domain(RUNTIME, "transient"));
                        }
                        Ok(saved)
                    })
            })?;

            assert_eq!(attempts.load(Ordering::SeqCst), 3);
            assert_eq!(ctx.users().count()?, 1);
            // ids of the rolled back attempts are not reused
            assert_eq!(saved.id().map(|id| id.value()), Some(3));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_conflict_retry_starts_from_fresh_read() {
    run_test(
        create_test_context,
        |ctx| {
            let id = insert_test_users(&ctx, 1)?[0];
            let attempts = AtomicU32::new(0);
            let policy = RetryPolicy::new()
                .with_delay(Duration::from_millis(5))
                .retry_for([ErrorKind::Conflict]);

            let saved = policy.run(|| {
                ctx.coordinator()
                    .execute(&TransactionConfig::requires_new(), None, |tx| {
                        let users = ctx.users().bind(tx);
                        let mut user = users.get(id)?;
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            // someone else commits in between
                            ctx.users().save(user.clone())?;
                        }
                        user.data_mut().email = "retried@example.com".to_string();
                        users.save(user)
                    })
            })?;

            assert_eq!(attempts.load(Ordering::SeqCst), 2);
            assert_eq!(saved.version(), 2);
            assert_eq!(ctx.users().get(id)?.data().email, "retried@example.com");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delay_between_attempts() {
    run_test(
        create_test_context,
        |_| {
            let started = Instant::now();
            let result: VersaResult<()> = RetryPolicy::new()
                .with_max_attempts(3)
                .with_delay(Duration::from_millis(50))
                .run(|| Err(VersaError::new("stale", ErrorKind::Conflict)));

            assert!(result.is_err());
            assert!(started.elapsed() >= Duration::from_millis(100));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_service_retry_with_audit() {
    run_test(
        create_test_context,
        |ctx| {
            let id = insert_test_users(&ctx, 1)?[0];
            let policy = RetryPolicy::new()
                .with_name("update user email")
                .with_delay(Duration::from_millis(5))
                .retry_for([ErrorKind::Conflict]);

            let saved = ctx
                .service()
                .update_user_email_with_retry(id, "audited@example.com", &policy)?;
            assert_eq!(saved.version(), 1);

            let err = ctx
                .service()
                .update_user_email_with_retry(
                    versa::RecordId::new(99),
                    "ghost@example.com",
                    &policy,
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotFound);
            Ok(())
        },
        cleanup,
    )
}
