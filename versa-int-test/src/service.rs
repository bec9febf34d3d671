use chrono::{DateTime, Local};
use fake::faker::internet::en::{FreeEmail, Username};
use fake::faker::lorem::en::{Paragraph, Sentence};
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use std::thread;
use std::time::Duration;
use versa::errors::{ErrorKind, VersaError, VersaResult};
use versa::event::{TransactionEvent, TransactionEventListener, TransactionPhase};
use versa::retry::RetryPolicy;
use versa::store::{Record, RecordId, RecordStoreProvider, VersionedStore};
use versa::transaction::{
    RollbackRule, TransactionConfig, TransactionContext, TransactionCoordinator,
};
use versa::Audit;

pub const ILLEGAL_ARGUMENT: &str = "IllegalArgument";
pub const UNSUPPORTED_OPERATION: &str = "UnsupportedOperation";
pub const RUNTIME: &str = "Runtime";
pub const USER_CREATED: &str = "UserCreated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
}

impl User {
    pub fn new(username: &str, email: &str) -> Self {
        User {
            username: username.to_string(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            active: true,
        }
    }

    pub fn generate() -> Self {
        User {
            username: Username().fake(),
            email: FreeEmail().fake(),
            first_name: FirstName().fake(),
            last_name: LastName().fake(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Local>,
}

impl Post {
    pub fn new(title: &str, content: &str) -> Self {
        Post {
            title: title.to_string(),
            content: content.to_string(),
            created_at: Local::now(),
        }
    }
}

/// A user together with their first post.
#[derive(Debug, Clone)]
pub struct UserPost {
    pub user: User,
    pub post_title: String,
    pub post_content: String,
}

impl UserPost {
    pub fn generate() -> Self {
        UserPost {
            user: User::generate(),
            post_title: Sentence(2..5).fake(),
            post_content: Paragraph(1..3).fake(),
        }
    }
}

/// Listeners that log every phase of a unit-of-work publishing `UserCreated`.
pub fn user_event_listeners() -> Vec<TransactionEventListener> {
    vec![
        TransactionEventListener::on(TransactionPhase::BeforeCommit, |event| {
            log::info!("BEFORE_COMMIT: {} is about to be committed", event.message());
            Ok(())
        }),
        TransactionEventListener::on(TransactionPhase::AfterCommit, |event| {
            log::info!("AFTER_COMMIT: {} has been committed", event.message());
            Ok(())
        }),
        TransactionEventListener::on(TransactionPhase::AfterRollback, |event| {
            log::info!("AFTER_ROLLBACK: {} has been rolled back", event.message());
            Ok(())
        }),
        TransactionEventListener::on(TransactionPhase::AfterCompletion, |event| {
            log::info!("AFTER_COMPLETION: {} has completed", event.message());
            Ok(())
        }),
    ]
}

/// Application service over the users and posts stores. Every method is
/// one unit-of-work run through the coordinator.
#[derive(Clone)]
pub struct UserService {
    coordinator: TransactionCoordinator,
    users: VersionedStore<User>,
    posts: VersionedStore<Post>,
}

impl UserService {
    pub fn new(
        coordinator: TransactionCoordinator,
        users: VersionedStore<User>,
        posts: VersionedStore<Post>,
    ) -> Self {
        UserService {
            coordinator,
            users,
            posts,
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn users(&self) -> &VersionedStore<User> {
        &self.users
    }

    pub fn posts(&self) -> &VersionedStore<Post> {
        &self.posts
    }

    /// Saves every user and post of `batch`, all or nothing.
    pub fn process_user_posts(&self, batch: &[UserPost]) -> VersaResult<Vec<RecordId>> {
        self.coordinator
            .execute(&TransactionConfig::required(), None, |ctx| {
                let users = self.users.bind(ctx);
                let posts = self.posts.bind(ctx);
                let mut ids = Vec::with_capacity(batch.len());
                for entry in batch {
                    let user = users.save(Record::new(entry.user.clone()))?;
                    log::info!("Saved user with ID: {:?}, version: {}", user.id(), user.version());
                    let post = posts.save(Record::new(Post::new(
                        &entry.post_title,
                        &entry.post_content,
                    )))?;
                    log::info!("Saved post with ID: {:?}, version: {}", post.id(), post.version());
                    ids.extend(user.id());
                }
                Ok(ids)
            })
    }

    pub fn find_user(
        &self,
        id: RecordId,
        caller: Option<&TransactionContext>,
    ) -> VersaResult<Record<User>> {
        self.coordinator
            .execute(&TransactionConfig::read_only(), caller, |ctx| self.users.bind(ctx).get(id))
    }

    /// Saves a record that may have been read long ago; a stale version fails.
    pub fn update_existing_user(&self, user: Record<User>) -> VersaResult<Record<User>> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            log::info!("Updating user {:?} at version {}", user.id(), user.version());
            let saved = self.users.bind(ctx).save(user)?;
            log::info!("Updated user, new version: {}", saved.version());
            Ok(saved)
        })
    }

    pub fn update_user_email(&self, id: RecordId, email: &str) -> VersaResult<Record<User>> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            let users = self.users.bind(ctx);
            let mut user = users.get(id)?;
            user.data_mut().email = email.to_string();
            users.save(user)
        })
    }

    /// Always commits on its own, whatever the caller does afterwards.
    pub fn create_user_with_new_transaction(
        &self,
        user: User,
        caller: Option<&TransactionContext>,
    ) -> VersaResult<Record<User>> {
        self.coordinator
            .execute(&TransactionConfig::requires_new(), caller, |ctx| {
                self.users.bind(ctx).save(Record::new(user))
            })
    }

    pub fn all_users_read_only(&self) -> VersaResult<Vec<Record<User>>> {
        self.coordinator
            .execute(&TransactionConfig::read_only(), None, |ctx| self.users.bind(ctx).find_all())
    }

    /// Tries to write inside a read-only unit-of-work.
    pub fn create_user_read_only(&self, user: User) -> VersaResult<Record<User>> {
        self.coordinator
            .execute(&TransactionConfig::read_only(), None, |ctx| {
                self.users.bind(ctx).save(Record::new(user))
            })
    }

    pub fn active_user_report(&self) -> VersaResult<usize> {
        self.coordinator
            .execute(&TransactionConfig::read_only_reporting(), None, |ctx| {
                let users = self.users.bind(ctx).find_all()?;
                Ok(users.iter().filter(|u| u.data().active).count())
            })
    }

    pub fn update_user_with_serializable_isolation(
        &self,
        id: RecordId,
        email: &str,
    ) -> VersaResult<Record<User>> {
        self.coordinator.execute(&TransactionConfig::serializable(), None, |ctx| {
            let users = self.users.bind(ctx);
            let mut user = users.get(id)?;
            user.data_mut().email = email.to_string();
            users.save(user)
        })
    }

    /// Rolls back on `IllegalArgument`, commits despite `UnsupportedOperation`.
    pub fn update_user_with_custom_rollback_rules(
        &self,
        id: RecordId,
        email: &str,
        fail_with: Option<&str>,
    ) -> VersaResult<Record<User>> {
        let rule = RollbackRule::new()
            .rollback_on([ErrorKind::domain(ILLEGAL_ARGUMENT)])
            .no_rollback_on([ErrorKind::domain(UNSUPPORTED_OPERATION)]);
        let config = TransactionConfig::required().with_rollback_rule(rule);

        self.coordinator.execute(&config, None, |ctx| {
            let users = self.users.bind(ctx);
            let mut user = users.get(id)?;
            user.data_mut().email = email.to_string();
            let saved = users.save(user)?;

            match fail_with {
                Some(kind) => Err(VersaError::domain(kind, "Test exception")),
                None => Ok(saved),
            }
        })
    }

    /// Sleeps for `delay` before touching the store.
    pub fn update_user_with_timeout(
        &self,
        id: RecordId,
        email: &str,
        timeout: Duration,
        delay: Duration,
    ) -> VersaResult<Record<User>> {
        let config = TransactionConfig::required().with_timeout(timeout);
        self.coordinator.execute(&config, None, |ctx| {
            log::info!("Updating user with {}ms timeout", timeout.as_millis());
            thread::sleep(delay);

            let users = self.users.bind(ctx);
            let mut user = users.get(id)?;
            user.data_mut().email = email.to_string();
            users.save(user)
        })
    }

    /// Saves `first` in an outer unit-of-work and `second` in an independent
    /// one, then optionally fails the outer one.
    pub fn nested_transaction_example(
        &self,
        first: User,
        second: User,
        fail_outer: bool,
    ) -> VersaResult<()> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            self.users.bind(ctx).save(Record::new(first))?;
            log::info!("Saved first user in outer transaction");

            let inner = self.create_user_with_new_transaction(second, Some(ctx))?;
            log::info!("Saved second user in inner transaction: {:?}", inner.id());

            if fail_outer {
                return Err(VersaError::domain(RUNTIME, "Simulated failure in outer transaction"));
            }
            Ok(())
        })
    }

    /// Saves `first`, then `second` in a savepoint. A failing savepoint is
    /// discarded while the outer unit-of-work still commits.
    pub fn savepoint_example(
        &self,
        first: User,
        second: User,
        fail_inner: bool,
    ) -> VersaResult<bool> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            self.users.bind(ctx).save(Record::new(first))?;

            let inner = self.coordinator.execute(&TransactionConfig::nested(), Some(ctx), |child| {
                self.users.bind(child).save(Record::new(second))?;
                if fail_inner {
                    return Err(VersaError::domain(RUNTIME, "Simulated failure in savepoint"));
                }
                Ok(())
            });

            match inner {
                Ok(()) => Ok(true),
                Err(err) => {
                    log::warn!("Savepoint rolled back: {}", err);
                    Ok(false)
                }
            }
        })
    }

    pub fn bulk_update_user_status(&self, active: bool) -> VersaResult<usize> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            let users = self.users.bind(ctx);
            let all = users.find_all()?;
            let updated = all.len();
            for mut user in all {
                user.data_mut().active = active;
                users.save(user)?;
            }
            log::info!("Updated status for {} users", updated);
            Ok(updated)
        })
    }

    /// Saves `user` and publishes a `UserCreated` event for the phase listeners.
    pub fn save_user_with_events(&self, user: User) -> VersaResult<Record<User>> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            let message = format!("User {}", user.username);
            let saved = self.users.bind(ctx).save(Record::new(user))?;
            if let Some(id) = saved.id() {
                ctx.publish(TransactionEvent::new(USER_CREATED, &message).with_record(id))?;
            }
            Ok(saved)
        })
    }

    pub fn update_user_and_post(
        &self,
        user_id: RecordId,
        post_id: RecordId,
        should_fail: bool,
    ) -> VersaResult<bool> {
        self.coordinator.execute(&TransactionConfig::required(), None, |ctx| {
            let users = self.users.bind(ctx);
            let posts = self.posts.bind(ctx);

            let mut user = users.get(user_id)?;
            user.data_mut().first_name = "Updated First Name".to_string();
            user.data_mut().last_name = "Updated Last Name".to_string();
            users.save(user)?;

            let mut post = posts.get(post_id)?;
            post.data_mut().title = "Updated Title".to_string();
            post.data_mut().content = "Updated Content".to_string();
            posts.save(post)?;

            if should_fail {
                log::warn!("Simulating a failure in the transaction");
                return Err(VersaError::domain(RUNTIME, "Simulated failure"));
            }
            Ok(true)
        })
    }

    /// Audited email update that starts over from a fresh read on conflict.
    pub fn update_user_email_with_retry(
        &self,
        id: RecordId,
        email: &str,
        policy: &RetryPolicy,
    ) -> VersaResult<Record<User>> {
        Audit::new("update user email")
            .with_params(&format!("{}, {}", id, email))
            .run(|| policy.run(|| self.update_user_email(id, email)))
    }
}
