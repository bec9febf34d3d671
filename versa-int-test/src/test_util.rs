use crate::service::{user_event_listeners, Post, User, UserPost, UserService};
use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use versa::errors::VersaResult;
use versa::event::{TransactionEventListener, TransactionPhase};
use versa::store::{RecordId, VersionedStore};
use versa::transaction::TransactionCoordinator;

/// Runs a test with retry logic and error handling.
/// Tests run on the current thread so timing-sensitive scenarios are not
/// starved by other test threads.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> VersaResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> VersaResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> VersaResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => match after(ctx) {
                        Ok(_) => Ok(()),
                        Err(e) => Err((
                            format!("After run failed: {:?}", e),
                            backtrace.to_string(),
                        )),
                    },
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        let failure = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_backtrace = Some(bt);
                format!("Error: {}", e)
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                last_backtrace = Some(Backtrace::capture().to_string());
                format!("Panic: {}", err_msg)
            }
        };
        last_error = Some(failure.clone());

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("{}", failure);
            eprintln!("Retrying in {}ms...\n", 100 * attempt);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// Fresh stores and a coordinator that records every phase notification.
#[derive(Clone)]
pub struct TestContext {
    service: UserService,
    phases: Arc<Mutex<Vec<String>>>,
}

impl TestContext {
    pub fn service(&self) -> &UserService {
        &self.service
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        self.service.coordinator()
    }

    pub fn users(&self) -> &VersionedStore<User> {
        self.service.users()
    }

    pub fn posts(&self) -> &VersionedStore<Post> {
        self.service.posts()
    }

    /// `"<PHASE>:<topic>"` for every notification so far, in dispatch order.
    pub fn phases(&self) -> Vec<String> {
        self.phases.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn clear_phases(&self) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.clear();
        }
    }
}

pub fn create_test_context() -> VersaResult<TestContext> {
    let phases = Arc::new(Mutex::new(Vec::new()));
    let recorded = phases.clone();

    let mut builder = TransactionCoordinator::builder()
        .name("int-test")
        .listener(TransactionEventListener::new(move |phase: TransactionPhase, event| {
            if let Ok(mut phases) = recorded.lock() {
                phases.push(format!("{}:{}", phase, event.topic()));
            }
            Ok(())
        }));
    for listener in user_event_listeners() {
        builder = builder.listener(listener);
    }

    let service = UserService::new(
        builder.build()?,
        VersionedStore::new("users"),
        VersionedStore::new("posts"),
    );
    Ok(TestContext { service, phases })
}

pub fn cleanup(ctx: TestContext) -> VersaResult<()> {
    log::debug!("Coordinator stats after test: {:?}", ctx.coordinator().stats());
    ctx.clear_phases();
    Ok(())
}

/// Seeds `count` generated users with their posts and returns the user ids.
pub fn insert_test_users(ctx: &TestContext, count: usize) -> VersaResult<Vec<RecordId>> {
    let batch: Vec<UserPost> = (0..count).map(|_| UserPost::generate()).collect();
    ctx.service().process_user_posts(&batch)
}

pub fn is_sorted<T: Ord>(iterable: impl IntoIterator<Item = T>) -> bool {
    let mut iter = iterable.into_iter();
    let mut prev = match iter.next() {
        Some(v) => v,
        None => return true,
    };
    for next in iter {
        if next < prev {
            return false;
        }
        prev = next;
    }
    true
}
