use std::time::Duration;
use versa::errors::{ErrorKind, VersaResult};
use versa::retry::RetryPolicy;
use versa::store::{RecordStoreProvider, VersionedStore};
use versa::transaction::TransactionCoordinator;
use versa_int_test::service::{
    user_event_listeners, User, UserPost, UserService, ILLEGAL_ARGUMENT, UNSUPPORTED_OPERATION,
};

fn main() -> VersaResult<()> {
    colog::init();

    let mut builder = TransactionCoordinator::builder().name("demo");
    for listener in user_event_listeners() {
        builder = builder.listener(listener);
    }
    let service = UserService::new(
        builder.build()?,
        VersionedStore::new("users"),
        VersionedStore::new("posts"),
    );

    log::info!("=== Batch insert ===");
    let batch: Vec<UserPost> = (0..3).map(|_| UserPost::generate()).collect();
    let ids = service.process_user_posts(&batch)?;
    let id = ids[0];

    log::info!("=== Optimistic locking ===");
    let stale = service.find_user(id, None)?;
    service.update_user_email(id, "fresh@example.com")?;
    match service.update_existing_user(stale) {
        Ok(_) => log::warn!("stale save unexpectedly succeeded"),
        Err(err) => log::info!("stale save rejected: {}", err),
    }

    log::info!("=== REQUIRES_NEW ===");
    let result = service.nested_transaction_example(User::generate(), User::generate(), true);
    log::info!(
        "outer failed with {:?}, users now: {}",
        result.err().map(|e| e.kind().clone()),
        service.users().count()?
    );

    log::info!("=== Savepoint ===");
    let kept = service.savepoint_example(User::generate(), User::generate(), true)?;
    log::info!("savepoint kept: {}", kept);

    log::info!("=== Read-only ===");
    let users = service.all_users_read_only()?;
    log::info!("read {} users", users.len());
    if let Err(err) = service.create_user_read_only(User::generate()) {
        log::info!("read-only write rejected: {}", err);
    }
    log::info!("active users: {}", service.active_user_report()?);

    log::info!("=== Serializable ===");
    service.update_user_with_serializable_isolation(id, "serial@example.com")?;

    log::info!("=== Rollback rules ===");
    for kind in [ILLEGAL_ARGUMENT, UNSUPPORTED_OPERATION] {
        let email = format!("{}@example.com", kind.to_lowercase());
        let result = service.update_user_with_custom_rollback_rules(id, &email, Some(kind));
        log::info!(
            "{} -> {:?}, stored email: {}",
            kind,
            result.err().map(|e| e.kind().clone()),
            service.users().get(id)?.data().email
        );
    }

    log::info!("=== Timeout ===");
    let result = service.update_user_with_timeout(
        id,
        "late@example.com",
        Duration::from_millis(100),
        Duration::from_millis(150),
    );
    log::info!("slow update -> {:?}", result.err().map(|e| e.kind().clone()));

    log::info!("=== Bulk update ===");
    log::info!("deactivated {} users", service.bulk_update_user_status(false)?);

    log::info!("=== Transaction events ===");
    service.save_user_with_events(User::generate())?;

    log::info!("=== Retry ===");
    let policy = RetryPolicy::new()
        .with_name("update user email")
        .with_delay(Duration::from_millis(50))
        .retry_for([ErrorKind::Conflict]);
    service.update_user_email_with_retry(id, "retried@example.com", &policy)?;

    log::info!("Coordinator stats: {:?}", service.coordinator().stats());
    Ok(())
}
