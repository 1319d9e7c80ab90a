use crate::document::DocumentId;
use crate::error::Result;
use crate::fetch::{CompletionAction, FetchPhase, RequestAction};
use crate::liveness::Liveness;
use crate::options::QueryOptions;
use crate::state::{QueryState, ViewState};
use crate::store::{Change, DocumentStore};
use crate::subscription::{Notification, Subscription, SubscriptionManager};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use tokio::sync::watch;

/// A live, ordered slice of the store.
///
/// Re-queries when the options change or when an insert/update lands in
/// range; deletions in range are patched into the rows directly. At most
/// one query is in flight at a time, and refresh requests that arrive
/// meanwhile collapse into a single follow-up query.
///
/// Fetches are spawned with `tokio::task::spawn_local`, so `watch` and
/// `refresh` must be called from inside a `LocalSet`.
pub struct RangedView<S: DocumentStore + 'static> {
    store: Rc<S>,
    subscriptions: SubscriptionManager,
    state: Rc<watch::Sender<ViewState>>,
    active: Option<ActiveRange<S>>,
}

impl<S: DocumentStore + 'static> RangedView<S> {
    pub fn new(store: Rc<S>, subscriptions: SubscriptionManager) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        RangedView {
            store,
            subscriptions,
            state: Rc::new(state),
            active: None,
        }
    }

    /// Point the view at `options`. A value different from the current
    /// options (or the first call) starts a new session: the state goes to
    /// `Loading`, the previous rows stay visible until the query lands.
    pub fn watch(&mut self, options: QueryOptions) -> ViewState {
        let unchanged = self
            .active
            .as_ref()
            .is_some_and(|active| active.session.options == options);
        if !unchanged {
            self.start(options);
        }
        self.state()
    }

    fn start(&mut self, options: QueryOptions) {
        // tear down first so the old session cannot commit into the new one
        self.active = None;

        let session = Rc::new(RangeSession {
            store: Rc::clone(&self.store),
            options,
            liveness: Liveness::new(),
            phase: Cell::new(FetchPhase::Idle),
            deleted_during_fetch: RefCell::new(BTreeSet::new()),
            state: Rc::clone(&self.state),
        });

        let weak = Rc::downgrade(&session);
        let subscription = self.subscriptions.subscribe_to_docs(
            session.options.subscription_ids(),
            move |notification| {
                if let Some(session) = weak.upgrade() {
                    match notification {
                        Notification::Change(change) => session.on_change(change),
                        Notification::Resync => session.request_fetch(),
                    }
                }
            },
        );

        session.request_fetch();
        self.active = Some(ActiveRange {
            session,
            _subscription: subscription,
        });
    }

    /// Ask for a re-query of the current options.
    pub fn refresh(&self) {
        if let Some(active) = &self.active {
            active.session.request_fetch();
        }
    }

    /// Stop watching. Pending fetches and change events become no-ops.
    pub fn close(&mut self) {
        self.active = None;
    }

    pub fn options(&self) -> Option<&QueryOptions> {
        self.active.as_ref().map(|active| &active.session.options)
    }

    /// Current phase of the active session's fetch cycle.
    pub fn fetch_phase(&self) -> FetchPhase {
        self.active
            .as_ref()
            .map(|active| active.session.phase.get())
            .unwrap_or_default()
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every commit to the view state.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    /// Wait until the view is no longer `Loading` and return that state.
    /// A closed view never settles, so this returns its state as is.
    pub async fn settled(&self) -> ViewState {
        if self.active.is_none() {
            return self.state();
        }
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|state| !state.loading()).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.state(),
        };
        settled
    }
}

/// Teardown guard for the current session.
struct ActiveRange<S: DocumentStore + 'static> {
    session: Rc<RangeSession<S>>,
    _subscription: Subscription,
}

impl<S: DocumentStore + 'static> Drop for ActiveRange<S> {
    fn drop(&mut self) {
        self.session.liveness.cancel();
        // _subscription is released right after this
    }
}

/// Fetch and change handling for one options value.
struct RangeSession<S: DocumentStore + 'static> {
    store: Rc<S>,
    options: QueryOptions,
    liveness: Liveness,
    phase: Cell<FetchPhase>,
    /// Ids deleted while the current query was in flight. Its result may
    /// predate the deletion, so they are stripped again on commit.
    deleted_during_fetch: RefCell<BTreeSet<DocumentId>>,
    state: Rc<watch::Sender<ViewState>>,
}

impl<S: DocumentStore + 'static> RangeSession<S> {
    fn commit(&self, modify: impl FnOnce(&mut ViewState) -> bool) -> Result<bool> {
        self.liveness.check()?;
        Ok(self.state.send_if_modified(modify))
    }

    fn mark_loading(&self) {
        let marked = self.commit(|state| {
            let changed = state.query_state != QueryState::Loading;
            state.query_state = QueryState::Loading;
            changed
        });
        if marked.is_err() {
            log::debug!("Not marking torn-down view {:?} as loading", self.options);
        }
    }

    fn request_fetch(self: &Rc<Self>) {
        if !self.liveness.is_alive() {
            return;
        }

        let mut phase = self.phase.get();
        let action = phase.request();
        self.phase.set(phase);

        match action {
            RequestAction::Issue => {
                log::debug!("Issuing query for {:?}", self.options);
                self.begin_fetch();
                tokio::task::spawn_local(Rc::clone(self).run_fetches());
            }
            RequestAction::Coalesced => {
                log::debug!("Query in flight, refresh coalesced for {:?}", self.options);
            }
        }
    }

    fn begin_fetch(&self) {
        self.deleted_during_fetch.borrow_mut().clear();
        self.mark_loading();
    }

    async fn run_fetches(self: Rc<Self>) {
        loop {
            let result = self.store.query(&self.options).await;

            let deleted: BTreeSet<DocumentId> = self.deleted_during_fetch.take();
            let committed = self.commit(|state| {
                match result {
                    Ok(response) => {
                        state.apply_response(response);
                        for id in &deleted {
                            state.remove_row(id);
                        }
                    }
                    Err(e) => {
                        log::debug!("Query failed for {:?}: {e}", self.options);
                        state.apply_error(e);
                    }
                }
                true
            });
            if committed.is_err() {
                log::debug!("Discarding query result for torn-down view {:?}", self.options);
                return;
            }

            let mut phase = self.phase.get();
            let action = phase.complete();
            self.phase.set(phase);

            match action {
                CompletionAction::Settle => return,
                CompletionAction::Reissue => {
                    log::debug!("Changes arrived during query, re-issuing for {:?}", self.options);
                    self.begin_fetch();
                }
            }
        }
    }

    fn on_change(self: &Rc<Self>, change: &Change) {
        if !self.liveness.is_alive() {
            return;
        }
        if !self.options.could_affect(&change.id) {
            log::trace!("Ignoring change to {}: outside {:?}", change.id, self.options);
            return;
        }

        if change.deleted {
            if self.phase.get().is_fetching() {
                self.deleted_during_fetch
                    .borrow_mut()
                    .insert(change.id.clone());
            }
            if self.commit(|state| state.remove_row(&change.id) > 0).is_err() {
                log::debug!("Dropping deletion of {} for torn-down view", change.id);
            }
        } else {
            // ordering of a new or updated row is unknown without the store
            self.request_fetch();
        }
    }
}
