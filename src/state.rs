//! View state for a holiday list screen.
//!
//! [`HolidayViewModel`] owns everything a front end renders (search text,
//! current list, loading flag, last error) and turns user intents into
//! repository calls. Each field is its own `watch` channel so a front end
//! can observe them independently.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{HolidayRepository, RepoError};
use crate::models::Holiday;

/// The live query currently feeding the list.
struct Subscription {
    /// Bumped on every replacement; a task only publishes while its
    /// generation is current.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct Fields {
    query: watch::Sender<String>,
    holidays: watch::Sender<Vec<Holiday>>,
    loading: watch::Sender<bool>,
    error: watch::Sender<Option<String>>,
}

pub struct HolidayViewModel {
    repo: HolidayRepository,
    fields: Arc<Fields>,
    subscription: Arc<Mutex<Subscription>>,
}

impl HolidayViewModel {
    /// Creates the view model and starts watching with an empty query.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(repo: HolidayRepository) -> Self {
        let fields = Arc::new(Fields {
            query: watch::channel(String::new()).0,
            holidays: watch::channel(Vec::new()).0,
            loading: watch::channel(false).0,
            error: watch::channel(None).0,
        });

        let view_model = Self {
            repo,
            fields,
            subscription: Arc::new(Mutex::new(Subscription {
                generation: 0,
                task: None,
            })),
        };
        view_model.resubscribe("");
        view_model
    }

    pub fn query(&self) -> watch::Receiver<String> {
        self.fields.query.subscribe()
    }

    pub fn holidays(&self) -> watch::Receiver<Vec<Holiday>> {
        self.fields.holidays.subscribe()
    }

    pub fn loading(&self) -> watch::Receiver<bool> {
        self.fields.loading.subscribe()
    }

    pub fn error(&self) -> watch::Receiver<Option<String>> {
        self.fields.error.subscribe()
    }

    /// Current error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.fields.error.borrow().clone()
    }

    /// Sets the search text and replaces the live query with one for it.
    ///
    /// Once this returns, nothing from the previous query reaches the list.
    pub fn set_query(&self, text: impl Into<String>) {
        let text = text.into();
        self.fields.query.send_replace(text.clone());
        self.resubscribe(&text);
    }

    /// Creates a holiday, returning its id on success.
    pub async fn add_holiday(&self, holiday: Holiday) -> Option<String> {
        self.fields.loading.send_replace(true);
        let result = self.repo.create(&holiday).await;
        let id = self.record(result);
        self.fields.loading.send_replace(false);
        id
    }

    pub async fn update_holiday(&self, holiday: Holiday) {
        self.fields.loading.send_replace(true);
        let result = self.repo.update(&holiday).await;
        self.record(result);
        self.fields.loading.send_replace(false);
    }

    pub async fn delete_holiday(&self, holiday: &Holiday) {
        self.fields.loading.send_replace(true);
        let result = self.repo.delete(&holiday.id).await;
        self.record(result);
        self.fields.loading.send_replace(false);
    }

    pub fn clear_error(&self) {
        self.fields.error.send_replace(None);
    }

    /// Stores a failure in the error field. Success leaves it untouched.
    fn record<T>(&self, result: Result<T, RepoError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.fields.error.send_replace(Some(e.to_string()));
                None
            }
        }
    }

    fn lock_subscription(subscription: &Mutex<Subscription>) -> MutexGuard<'_, Subscription> {
        // The guarded data stays consistent even if a holder panicked
        subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resubscribe(&self, query: &str) {
        let mut current = Self::lock_subscription(&self.subscription);

        current.generation += 1;
        if let Some(task) = current.task.take() {
            task.abort();
        }

        let generation = current.generation;
        let mut stream = self.repo.watch(query);
        let fields = Arc::clone(&self.fields);
        let subscription = Arc::clone(&self.subscription);

        current.task = Some(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let current = Self::lock_subscription(&subscription);
                if current.generation != generation {
                    return;
                }
                match item {
                    Ok(list) => {
                        fields.holidays.send_replace(list);
                    }
                    Err(e) => {
                        fields.error.send_replace(Some(e.to_string()));
                    }
                }
            }
        }));
    }
}

impl Drop for HolidayViewModel {
    fn drop(&mut self) {
        let mut current = Self::lock_subscription(&self.subscription);
        current.generation += 1;
        if let Some(task) = current.task.take() {
            task.abort();
        }
    }
}
