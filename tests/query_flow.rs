//! End-to-end flows through a `QueryClient`: dedup, invalidation, pagination
//! and unmount safety working together.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use requery::{
  ClientConfig, Notifier, Params, QueryClient, QueryError, QueryKey, QueryStatus, ResponseBody,
};

fn init_logs() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("requery=debug")),
    )
    .try_init();
}

fn client() -> QueryClient {
  QueryClient::new(ClientConfig::default())
}

#[derive(Default)]
struct RecordingNotifier {
  messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
  fn success(&self, message: &str) {
    self.messages.lock().unwrap().push(format!("ok:{}", message));
  }

  fn error(&self, message: &str) {
    self.messages.lock().unwrap().push(format!("err:{}", message));
  }
}

#[tokio::test]
async fn two_consumers_sharing_a_key_trigger_one_network_call() {
  init_logs();
  let client = client();
  let calls = Arc::new(AtomicU32::new(0));

  let make_query = |calls: Arc<AtomicU32>| {
    client
      .query(QueryKey::new("courses"), move |_| {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok(ResponseBody::new(vec![1u32, 2, 3]))
        }
      })
      .build()
  };

  // Two independent handles over the same key, fetching simultaneously.
  let a = make_query(calls.clone());
  let b = make_query(calls.clone());
  let (sa, sb) = tokio::join!(a.fetch(), b.fetch());

  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(sa.data(), sb.data());
  assert_eq!(sa.data(), Some(&vec![1u32, 2, 3]));
}

#[tokio::test]
async fn mutation_invalidation_forces_refetch_on_next_read() {
  let client = client();
  let version = Arc::new(AtomicU32::new(0));

  let version_fetch = version.clone();
  let courses = client
    .query(QueryKey::new("courses"), move |_| {
      let version = version_fetch.clone();
      async move { Ok(ResponseBody::new(version.fetch_add(1, Ordering::SeqCst))) }
    })
    .build();

  assert_eq!(courses.fetch().await.data(), Some(&0));
  // Fresh cache: still version 0, no new network call.
  assert_eq!(courses.fetch().await.data(), Some(&0));

  let publish = client
    .mutation(|_| async { Ok(ResponseBody::new(())) })
    .invalidates(QueryKey::new("courses"))
    .build();
  publish.mutate(Params::new()).await.expect("mutation");

  // The very next read refetches instead of serving the stale entry.
  assert_eq!(courses.fetch().await.data(), Some(&1));
}

#[tokio::test]
async fn invalidation_during_in_flight_fetch_keeps_entry_stale() {
  let client = client();
  let version = Arc::new(AtomicU32::new(0));

  let version_fetch = version.clone();
  let courses = client
    .query(QueryKey::new("courses"), move |_| {
      let version = version_fetch.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(ResponseBody::new(version.fetch_add(1, Ordering::SeqCst)))
      }
    })
    .build();

  let pending = {
    let courses = courses.clone();
    tokio::spawn(async move { courses.fetch().await })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;

  // The write lands while the read is still in flight.
  let publish = client
    .mutation(|_| async { Ok(ResponseBody::new(())) })
    .invalidates(QueryKey::new("courses"))
    .build();
  publish.mutate(Params::new()).await.expect("mutation");

  // The pre-mutation fetch still commits its data,
  assert_eq!(pending.await.expect("no panic").data(), Some(&0));
  // but the next read refetches instead of serving it as fresh.
  assert_eq!(courses.fetch().await.data(), Some(&1));
}

#[tokio::test]
async fn mutation_error_notifies_server_message_and_rejects() {
  let notifier = Arc::new(RecordingNotifier::default());
  let messages = notifier.clone();
  let client = QueryClient::new(ClientConfig::default()).with_notifier(notifier);

  let enroll = client
    .mutation::<(), _, _>(|_| async {
      let body = serde_json::json!({ "message": "X" });
      Err(QueryError::from_error_body(Some(402), &body))
    })
    .build();

  let result = enroll.mutate(Params::new()).await;
  assert!(result.is_err());
  assert_eq!(*messages.messages.lock().unwrap(), vec!["err:X"]);
}

#[tokio::test]
async fn debounced_refetch_shares_one_call_across_callers() {
  init_logs();
  let client = QueryClient::new(ClientConfig {
    debounce_ms: 60,
    ..ClientConfig::default()
  });
  let calls = Arc::new(AtomicU32::new(0));
  let calls_fetch = calls.clone();

  let query = client
    .query(QueryKey::new("stats"), move |_| {
      let calls = calls_fetch.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseBody::new(99u32))
      }
    })
    .build();

  let (a, b, c, d, e) = tokio::join!(
    query.refetch(),
    query.refetch(),
    query.refetch(),
    query.refetch(),
    query.refetch()
  );
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  for state in [a, b, c, d, e] {
    assert_eq!(state.data(), Some(&99u32));
  }
}

#[tokio::test]
async fn unmounted_scope_discards_in_flight_fetch_silently() {
  let client = client();
  let scope = client.scope();

  let query = client
    .query(QueryKey::new("courses"), |_| async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(ResponseBody::new(vec![1u32]))
    })
    .scope(&scope)
    .build();

  let pending = {
    let query = query.clone();
    tokio::spawn(async move { query.fetch().await })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;
  scope.end();

  // The fetch resolves without panicking and without committing anything.
  let state = pending.await.expect("no panic");
  assert!(state.data().is_none());
  assert_ne!(query.state().status, QueryStatus::Success);
}

#[tokio::test]
async fn paginated_navigation_keeps_totals_and_resets_on_unmount() {
  let client = client();
  let scope = client.scope();

  let courses = client
    .paginated(QueryKey::new("courses"), |params: Params| async move {
      let page = params.get("page").and_then(|v| v.as_u64()).unwrap_or(1);
      let size = params.get("page_size").and_then(|v| v.as_u64()).unwrap_or(10);
      let remaining = 47u64.saturating_sub((page - 1) * size);
      let count = remaining.min(size);
      let items: Vec<u64> = (0..count).map(|i| (page - 1) * size + i).collect();
      Ok(ResponseBody::new(items).with_total(47))
    })
    .table("course-table")
    .scope(&scope)
    .build();

  courses.fetch().await;
  assert_eq!(courses.pagination().total, 47);
  assert_eq!(courses.pagination().count, 10);

  // Last page is short.
  courses.fetch_page(5).await;
  assert_eq!(courses.pagination().count, 7);

  // Shrinking the page size snaps back to page 1.
  courses.fetch_page_size(20).await;
  assert_eq!(courses.pagination().page, 1);
  assert_eq!(courses.pagination().count, 20);

  scope.end();
  let state = courses.pagination();
  assert_eq!((state.page, state.page_size, state.total), (1, 10, 0));
}

#[tokio::test]
async fn subscriber_observes_loading_then_success() {
  let client = client();
  let statuses = Arc::new(Mutex::new(Vec::new()));

  let query = client
    .query(QueryKey::new("courses"), |_| async {
      Ok(ResponseBody::new(1u32))
    })
    .build();

  let statuses_sub = statuses.clone();
  let _sub = query.subscribe(move |state: requery::QueryState<u32>| {
    statuses_sub.lock().unwrap().push(state.status);
  });

  query.fetch().await;
  assert_eq!(
    *statuses.lock().unwrap(),
    vec![QueryStatus::Loading, QueryStatus::Success]
  );
}
