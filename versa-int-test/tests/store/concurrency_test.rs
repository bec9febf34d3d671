use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use versa::errors::{ErrorKind, VersaResult};
use versa::retry::RetryPolicy;
use versa::store::{Record, RecordStoreProvider};
use versa::transaction::TransactionConfig;
use versa_int_test::service::User;
use versa_int_test::test_util::{
    cleanup, create_test_context, insert_test_users, is_sorted, run_test,
};

#[test]
fn test_concurrent_writers_have_one_winner_per_version() {
    run_test(
        create_test_context,
        |ctx| {
            let id = insert_test_users(&ctx, 1)?[0];

            let num_threads = 8;
            let rounds = 5;
            let barrier = Arc::new(Barrier::new(num_threads));
            let wins = Arc::new(AtomicUsize::new(0));
            let conflicts = Arc::new(AtomicUsize::new(0));
            let finished = Arc::new(AtomicUsize::new(0));

            let mut handles = vec![];
            for thread_id in 0..num_threads {
                let service = ctx.service().clone();
                let barrier = barrier.clone();
                let wins = wins.clone();
                let conflicts = conflicts.clone();
                let finished = finished.clone();

                handles.push(thread::spawn(move || {
                    barrier.wait();
                    for round in 0..rounds {
                        let email = format!("thread{}_round{}@example.com", thread_id, round);
                        match service.update_user_email(id, &email) {
                            Ok(_) => wins.fetch_add(1, Ordering::SeqCst),
                            Err(e) if e.kind() == &ErrorKind::Conflict => {
                                conflicts.fetch_add(1, Ordering::SeqCst)
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        };
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                }));
            }

            awaitility::at_most(Duration::from_secs(10))
                .until(|| finished.load(Ordering::SeqCst) == num_threads);
            for handle in handles {
                let _ = handle.join();
            }

            let wins = wins.load(Ordering::SeqCst);
            assert!(wins >= 1);
            assert_eq!(wins + conflicts.load(Ordering::SeqCst), num_threads * rounds);
            // every successful save produced exactly one new version
            assert_eq!(ctx.users().get(id)?.version(), wins as u64);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_concurrent_increments_with_retry_lose_nothing() {
    run_test(
        create_test_context,
        |ctx| {
            let counter = ctx.users().save(Record::new(User::new("counter", "0")))?;
            let id = counter.id().ok_or("counter has no id")?;

            let num_threads = 6;
            let increments = 5;
            let finished = Arc::new(AtomicUsize::new(0));
            let policy = RetryPolicy::new()
                .with_name("increment")
                .with_max_attempts(200)
                .with_delay(Duration::from_millis(1))
                .with_jitter(Duration::from_millis(3))
                .retry_for([ErrorKind::Conflict]);

            let mut handles = vec![];
            for _ in 0..num_threads {
                let coordinator = ctx.coordinator().clone();
                let users = ctx.users().clone();
                let policy = policy.clone();
                let finished = finished.clone();

                handles.push(thread::spawn(move || -> VersaResult<()> {
                    for _ in 0..increments {
                        policy.run(|| {
                            coordinator.execute(&TransactionConfig::required(), None, |tx| {
                                let bound = users.bind(tx);
                                let mut record = bound.get(id)?;
                                let value: u32 = record.data().email.parse().unwrap_or(0);
                                record.data_mut().email = (value + 1).to_string();
                                bound.save(record)
                            })
                        })?;
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }));
            }

            awaitility::at_most(Duration::from_secs(20))
                .until(|| finished.load(Ordering::SeqCst) == num_threads);
            for handle in handles {
                if let Ok(result) = handle.join() {
                    result?;
                }
            }

            let stored = ctx.users().get(id)?;
            let total = num_threads * increments;
            assert_eq!(stored.data().email, total.to_string());
            assert_eq!(stored.version(), total as u64);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_concurrent_inserts_get_distinct_ids() {
    run_test(
        create_test_context,
        |ctx| {
            let num_threads = 5;
            let per_thread = 10;
            let barrier = Arc::new(Barrier::new(num_threads));

            let mut handles = vec![];
            for _ in 0..num_threads {
                let service = ctx.service().clone();
                let barrier = barrier.clone();
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        let _ = service.create_user_with_new_transaction(User::generate(), None);
                    }
                }));
            }
            for handle in handles {
                let _ = handle.join();
            }

            let users = ctx.users().find_all()?;
            assert_eq!(users.len(), num_threads * per_thread);
            let mut ids: Vec<u64> = users
                .iter()
                .filter_map(|u| u.id())
                .map(|id| id.value())
                .collect();
            // find_all returns records in id order
            assert!(is_sorted(ids.iter()));
            ids.dedup();
            assert_eq!(ids.len(), num_threads * per_thread);
            Ok(())
        },
        cleanup,
    )
}
