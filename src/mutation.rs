//! Mutations: write operations with declarative cache invalidation.
//!
//! A mutation names the query keys its write makes stale. On success those
//! keys are invalidated first, then the success notification fires, then the
//! caller's continuation runs; redirects and other navigation belong in the
//! continuation so they always observe invalidated state. On failure the
//! error notification is derived from the structured error body and the
//! returned future rejects, letting callers branch on the error.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::params::Params;
use crate::query::ResponseBody;

/// Fallback text for a success notification when neither the mutation nor the
/// response supplies one.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Saved";

/// Fire-and-forget notification sink (toasts, snackbars).
pub trait Notifier: Send + Sync {
  fn success(&self, message: &str);
  fn error(&self, message: &str);
}

/// Notifier that discards everything. The default.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
  fn success(&self, _message: &str) {}

  fn error(&self, _message: &str) {}
}

type MutateFn<T> =
  Arc<dyn Fn(Params) -> BoxFuture<'static, Result<ResponseBody<T>, QueryError>> + Send + Sync>;

type ContinuationFn<T> = Arc<dyn Fn(ResponseBody<T>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builder for a [`Mutation`].
pub struct MutationBuilder<T> {
  store: Arc<CacheStore>,
  notifier: Arc<dyn Notifier>,
  mutate: MutateFn<T>,
  invalidates: Vec<QueryKey>,
  success_message: Option<String>,
  on_success: Option<ContinuationFn<T>>,
}

impl<T> MutationBuilder<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub(crate) fn new<F, Fut>(store: Arc<CacheStore>, notifier: Arc<dyn Notifier>, mutate: F) -> Self
  where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseBody<T>, QueryError>> + Send + 'static,
  {
    Self {
      store,
      notifier,
      mutate: Arc::new(move |params| Box::pin(mutate(params))),
      invalidates: Vec::new(),
      success_message: None,
      on_success: None,
    }
  }

  /// Declare a query key whose cached data this write makes stale.
  /// May be called multiple times; prefix matching applies.
  pub fn invalidates(mut self, key: QueryKey) -> Self {
    self.invalidates.push(key);
    self
  }

  /// Explicit success notification text. Falls back to the response `message`
  /// field, then to [`DEFAULT_SUCCESS_MESSAGE`].
  pub fn success_message(mut self, message: impl Into<String>) -> Self {
    self.success_message = Some(message.into());
    self
  }

  /// Continuation run after invalidation and notification. Put redirects here.
  pub fn on_success<F, Fut>(mut self, continuation: F) -> Self
  where
    F: Fn(ResponseBody<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on_success = Some(Arc::new(move |body| Box::pin(continuation(body))));
    self
  }

  pub fn build(self) -> Mutation<T> {
    Mutation {
      store: self.store,
      notifier: self.notifier,
      mutate: self.mutate,
      invalidates: self.invalidates,
      success_message: self.success_message,
      on_success: self.on_success,
    }
  }
}

/// A write operation bound to the cache entries it invalidates.
pub struct Mutation<T> {
  store: Arc<CacheStore>,
  notifier: Arc<dyn Notifier>,
  mutate: MutateFn<T>,
  invalidates: Vec<QueryKey>,
  success_message: Option<String>,
  on_success: Option<ContinuationFn<T>>,
}

impl<T> Clone for Mutation<T> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      notifier: Arc::clone(&self.notifier),
      mutate: Arc::clone(&self.mutate),
      invalidates: self.invalidates.clone(),
      success_message: self.success_message.clone(),
      on_success: self.on_success.clone(),
    }
  }
}

impl<T> Mutation<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Run the write.
  ///
  /// By the time this resolves `Ok`, every declared key is stale and the
  /// success notification has fired. On failure the error has been notified
  /// and is returned so the caller may branch on it.
  pub async fn mutate(&self, params: Params) -> Result<ResponseBody<T>, QueryError> {
    match (self.mutate)(params).await {
      Ok(body) => {
        for key in &self.invalidates {
          let count = self.store.invalidate(key);
          debug!(key = %key, count, "mutation invalidated entries");
        }

        let message = self
          .success_message
          .clone()
          .or_else(|| body.message.clone())
          .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string());
        self.notifier.success(&message);

        if let Some(continuation) = &self.on_success {
          continuation(body.clone()).await;
        }
        Ok(body)
      }
      Err(error) => {
        self.notifier.error(&error.user_message());
        Err(error)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;

  /// Notifier that records every notification in order.
  struct RecordingNotifier {
    events: Arc<Mutex<Vec<String>>>,
  }

  impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
      self.events.lock().unwrap().push(format!("success:{}", message));
    }

    fn error(&self, message: &str) {
      self.events.lock().unwrap().push(format!("error:{}", message));
    }
  }

  fn recording() -> (Arc<RecordingNotifier>, Arc<Mutex<Vec<String>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    (
      Arc::new(RecordingNotifier {
        events: events.clone(),
      }),
      events,
    )
  }

  #[tokio::test]
  async fn test_server_error_message_is_notified_and_rejected() {
    let (notifier, events) = recording();
    let mutation: Mutation<()> =
      MutationBuilder::new(Arc::new(CacheStore::new()), notifier, |_| async {
        // Shape of a structured error body: { response: { data: { message } } }
        let body = json!({ "response": { "data": { "message": "X" } } });
        Err(QueryError::from_error_body(
          Some(422),
          &body["response"]["data"],
        ))
      })
      .build();

    let result = mutation.mutate(Params::new()).await;
    assert_eq!(
      result,
      Err(QueryError::Server {
        status: Some(422),
        message: "X".to_string()
      })
    );
    assert_eq!(*events.lock().unwrap(), vec!["error:X"]);
  }

  #[tokio::test]
  async fn test_invalidation_precedes_notification_and_continuation() {
    let (notifier, events) = recording();
    let store = Arc::new(CacheStore::new());
    let key = QueryKey::new("courses");

    // A subscriber records the moment the entry goes stale.
    let events_sub = events.clone();
    let _sub = Arc::clone(&store).subscribe(&key, move |snapshot| {
      if snapshot.is_stale {
        events_sub.lock().unwrap().push("stale".to_string());
      }
    });

    let events_cont = events.clone();
    let mutation: Mutation<u32> = MutationBuilder::new(store, notifier, |_| async {
      Ok(ResponseBody::new(1u32))
    })
    .invalidates(key.clone())
    .success_message("Course updated")
    .on_success(move |_| {
      let events = events_cont.clone();
      async move {
        events.lock().unwrap().push("continuation".to_string());
      }
    })
    .build();

    mutation.mutate(Params::new()).await.expect("mutation");
    assert_eq!(
      *events.lock().unwrap(),
      vec!["stale", "success:Course updated", "continuation"]
    );
  }

  #[tokio::test]
  async fn test_success_message_falls_back_to_response_message() {
    let (notifier, events) = recording();
    let mutation: Mutation<u32> =
      MutationBuilder::new(Arc::new(CacheStore::new()), notifier, |_| async {
        Ok(ResponseBody::new(1u32).with_message("Enrolled"))
      })
      .build();

    mutation.mutate(Params::new()).await.expect("mutation");
    assert_eq!(*events.lock().unwrap(), vec!["success:Enrolled"]);
  }
}
