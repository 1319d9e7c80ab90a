mod common;

use common::{run_pending, store_with, store_with_capacity, GatedStore};
use docview::{
    ChangeFilter, DocViewError, Document, DocumentStore, FetchPhase, QueryOptions, QueryState,
    RangedView, SubscriptionManager,
};
use pretty_assertions::assert_eq;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

#[tokio::test]
async fn test_scenario_delete_patches_and_update_refetches() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "c", "k"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::range("a", "m").inclusive_end(true));
            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["a", "c", "k"]);
            assert_eq!(state.total_count, 3);
            assert_eq!(store.stats().queries, 1);

            store.delete("c").unwrap();
            mux.drain(&mut feed);
            let state = view.state();
            assert_eq!(state.ids(), vec!["a", "k"]);
            assert_eq!(state.total_count, 2);
            assert_eq!(state.query_state, QueryState::Done);
            assert_eq!(view.fetch_phase(), FetchPhase::Idle);

            store.put(Document::new("e")).unwrap();
            mux.drain(&mut feed);
            assert!(view.state().loading());
            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["a", "e", "k"]);
            assert_eq!(state.total_count, 3);
            assert_eq!(store.stats().queries, 2);
        })
        .await;
}

#[tokio::test]
async fn test_out_of_range_changes_are_ignored() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "c", "x", "z"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::range("a", "m"));
            view.settled().await;
            let mut rx = view.subscribe();

            store.delete("z").unwrap();
            store.put(Document::new("y")).unwrap();
            mux.drain(&mut feed);

            assert!(!rx.has_changed().unwrap());
            assert_eq!(view.fetch_phase(), FetchPhase::Idle);
            run_pending().await;
            assert_eq!(store.stats().queries, 1);
            assert_eq!(view.state().ids(), vec!["a", "c"]);
        })
        .await;
}

#[tokio::test]
async fn test_deleting_unlisted_in_range_id_leaves_state_alone() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "b", "c"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            // limit keeps "c" out of the rows although it is in range
            view.watch(QueryOptions::range("a", "m").limit(2));
            let before = view.settled().await;
            let mut rx = view.subscribe();

            store.delete("c").unwrap();
            mux.drain(&mut feed);

            assert!(!rx.has_changed().unwrap());
            assert_eq!(view.state(), before);
            assert_eq!(store.stats().queries, 1);
        })
        .await;
}

#[tokio::test]
async fn test_updates_during_fetch_coalesce_into_one_follow_up() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(GatedStore::new(store_with(&["a"])));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::range("a", "m"));
            run_pending().await;
            assert_eq!(store.pending(), 1);
            assert_eq!(view.fetch_phase(), FetchPhase::Fetching);

            store.inner.put(Document::new("b")).unwrap();
            store.inner.put(Document::new("c")).unwrap();
            mux.drain(&mut feed);
            run_pending().await;

            assert_eq!(view.fetch_phase(), FetchPhase::FetchingPendingRefresh);
            assert_eq!(store.issued(), 1);

            store.release_oldest();
            run_pending().await;
            assert_eq!(store.issued(), 2);
            assert_eq!(store.pending(), 1);
            assert_eq!(view.fetch_phase(), FetchPhase::Fetching);
            assert!(view.state().loading());

            store.release_oldest();
            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["a", "b", "c"]);
            run_pending().await;
            assert_eq!(store.issued(), 2);
            assert_eq!(view.fetch_phase(), FetchPhase::Idle);
        })
        .await;
}

#[tokio::test]
async fn test_identity_change_discards_superseded_result() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(GatedStore::new(store_with(&["a", "b", "x", "y"])));
            let mut view = RangedView::new(Rc::clone(&store), SubscriptionManager::new());

            view.watch(QueryOptions::range("a", "b"));
            run_pending().await;
            let second = view.watch(QueryOptions::range("x", "y"));
            assert!(second.loading());
            run_pending().await;
            assert_eq!(store.pending(), 2);

            store.release_newest();
            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["x", "y"]);

            let mut rx = view.subscribe();
            store.release_oldest();
            run_pending().await;
            assert!(!rx.has_changed().unwrap());
            assert_eq!(view.state().ids(), vec!["x", "y"]);
        })
        .await;
}

#[tokio::test]
async fn test_identity_change_keeps_previous_rows_while_loading() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "b", "c"]));
            let mut view = RangedView::new(Rc::clone(&store), SubscriptionManager::new());

            view.watch(QueryOptions::new());
            view.settled().await;

            let loading = view.watch(QueryOptions::new().descending(true));
            assert!(loading.loading());
            assert_eq!(loading.ids(), vec!["a", "b", "c"]);

            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["c", "b", "a"]);
        })
        .await;
}

#[tokio::test]
async fn test_no_commit_after_close() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(GatedStore::new(store_with(&["a"])));
            let mux = SubscriptionManager::new();
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::new());
            run_pending().await;
            let mut rx = view.subscribe();

            view.close();
            assert_eq!(mux.listener_count(), 0);

            store.release_oldest();
            run_pending().await;

            assert!(!rx.has_changed().unwrap());
            let state = view.state();
            assert!(state.loading());
            assert!(state.rows.is_empty());
        })
        .await;
}

#[tokio::test]
async fn test_fetch_failure_keeps_rows_and_recovers() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(GatedStore::new(store_with(&["a", "b"])));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::new());
            run_pending().await;
            store.release_oldest();
            view.settled().await;

            view.refresh();
            run_pending().await;
            store.fail_oldest(DocViewError::Io("connection reset".into()));
            let state = view.settled().await;
            assert_eq!(state.query_state, QueryState::Error);
            assert_eq!(state.error, Some(DocViewError::Io("connection reset".into())));
            assert_eq!(state.ids(), vec!["a", "b"]);

            store.inner.put(Document::new("c")).unwrap();
            mux.drain(&mut feed);
            run_pending().await;
            store.release_oldest();
            let state = view.settled().await;
            assert_eq!(state.query_state, QueryState::Done);
            assert!(state.error.is_none());
            assert_eq!(state.ids(), vec!["a", "b", "c"]);
        })
        .await;
}

#[tokio::test]
async fn test_keyed_view_subscribes_to_its_ids_only() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "b", "c"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::new().keys(["c", "a"]).include_docs(true));
            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["c", "a"]);
            assert_eq!(state.rows[0].doc.as_ref().unwrap().field("name"), Some(&serde_json::json!("c")));

            store.put(Document::new("b").with_field("name", "bee")).unwrap();
            assert_eq!(mux.drain(&mut feed), 1);
            assert_eq!(view.fetch_phase(), FetchPhase::Idle);

            store.put(Document::new("a").with_field("name", "ay")).unwrap();
            mux.drain(&mut feed);
            let state = view.settled().await;
            assert_eq!(state.rows[1].doc.as_ref().unwrap().field("name"), Some(&serde_json::json!("ay")));
            assert_eq!(store.stats().queries, 2);
        })
        .await;
}

#[tokio::test]
async fn test_descending_view_uses_reversed_bounds() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "b", "c", "d", "e"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::range("d", "b").descending(true));
            assert_eq!(view.settled().await.ids(), vec!["d", "c", "b"]);

            store.delete("e").unwrap();
            store.delete("a").unwrap();
            mux.drain(&mut feed);
            assert_eq!(view.fetch_phase(), FetchPhase::Idle);

            store.delete("b").unwrap();
            mux.drain(&mut feed);
            assert_eq!(view.state().ids(), vec!["d", "c"]);
        })
        .await;
}

#[tokio::test]
async fn test_pumped_feed_drives_view() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a"]));
            let mux = SubscriptionManager::new();
            tokio::task::spawn_local({
                let mux = mux.clone();
                let feed = store.watch_changes(ChangeFilter::All);
                async move { mux.pump(feed).await }
            });

            let mut view = RangedView::new(Rc::clone(&store), mux.clone());
            view.watch(QueryOptions::new());
            view.settled().await;

            let mut rx = view.subscribe();
            store.put(Document::new("b")).unwrap();
            let state = tokio::time::timeout(
                Duration::from_secs(1),
                rx.wait_for(|state| state.rows.len() == 2 && !state.loading()),
            )
            .await
            .expect("view never caught up")
            .unwrap()
            .clone();
            assert_eq!(state.ids(), vec!["a", "b"]);
        })
        .await;
}

#[tokio::test]
async fn test_lagged_feed_requeries_in_range_view() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with_capacity(2, &["a"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::range("a", "m"));
            view.settled().await;

            // "b" falls out of the feed buffer; only "x" and "y" remain
            for id in ["b", "x", "y"] {
                store.put(Document::new(id)).unwrap();
            }
            assert_eq!(mux.drain(&mut feed), 2);
            assert!(view.state().loading());

            let state = view.settled().await;
            assert_eq!(state.ids(), vec!["a", "b"]);
            assert_eq!(store.stats().queries, 2);
        })
        .await;
}

#[tokio::test]
async fn test_keyed_row_outside_key_range_is_removed_on_delete() {
    LocalSet::new()
        .run_until(async {
            let store = Rc::new(store_with(&["a", "z"]));
            let mux = SubscriptionManager::new();
            let mut feed = store.watch_changes(ChangeFilter::All);
            let mut view = RangedView::new(Rc::clone(&store), mux.clone());

            view.watch(QueryOptions::range("a", "m").key("z"));
            assert_eq!(view.settled().await.ids(), vec!["z"]);

            store.delete("z").unwrap();
            mux.drain(&mut feed);
            let state = view.state();
            assert!(state.rows.is_empty());
            assert_eq!(state.query_state, QueryState::Done);
            assert_eq!(store.stats().queries, 1);
        })
        .await;
}
