use crate::document::{Document, DocumentId};
use crate::error::Result;
use crate::fetch::{CompletionAction, FetchPhase, RequestAction};
use crate::liveness::Liveness;
use crate::options::GetOptions;
use crate::state::{DocumentViewState, QueryState};
use crate::store::{Change, DocumentStore};
use crate::subscription::{Notification, Subscription, SubscriptionManager};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use tokio::sync::watch;

/// Placeholder shown before the first fetch lands, and again whenever
/// the watched id changes.
#[derive(Clone, Default)]
pub enum InitialValue {
    #[default]
    Empty,
    Value(Document),
    /// Invoked fresh on every id change.
    Producer(Rc<dyn Fn() -> Document>),
}

impl InitialValue {
    pub fn producer(f: impl Fn() -> Document + 'static) -> Self {
        InitialValue::Producer(Rc::new(f))
    }

    fn produce(&self) -> Option<Document> {
        match self {
            InitialValue::Empty => None,
            InitialValue::Value(doc) => Some(doc.clone()),
            InitialValue::Producer(f) => Some(f()),
        }
    }
}

impl fmt::Debug for InitialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialValue::Empty => f.write_str("Empty"),
            InitialValue::Value(doc) => f.debug_tuple("Value").field(doc).finish(),
            InitialValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// A live view of one document.
///
/// Fetches the document when the id or options change, then follows the
/// change feed for that id: updates replace the document in place
/// without a refetch, deletions set [`DocumentViewState::deleted`] and
/// keep the last known revision.
///
/// Must be driven from inside a `LocalSet`.
pub struct DocumentView<S: DocumentStore + 'static> {
    store: Rc<S>,
    subscriptions: SubscriptionManager,
    state: Rc<watch::Sender<DocumentViewState>>,
    active: Option<ActiveDoc<S>>,
    last_id: Option<DocumentId>,
}

impl<S: DocumentStore + 'static> DocumentView<S> {
    pub fn new(store: Rc<S>, subscriptions: SubscriptionManager) -> Self {
        let (state, _) = watch::channel(DocumentViewState::default());
        DocumentView {
            store,
            subscriptions,
            state: Rc::new(state),
            active: None,
            last_id: None,
        }
    }

    /// Point the view at `id`. On the first call, and whenever `id`
    /// differs from the previous call, the state resets to `initial`
    /// (without an initial value the previous doc stays visible while
    /// loading). A change of `id` or `options` starts a new fetch.
    pub fn watch(&mut self, id: &str, options: GetOptions, initial: &InitialValue) -> DocumentViewState {
        if self.last_id.as_deref() != Some(id) {
            let placeholder = initial.produce().map(|doc| doc.shaped(id));
            self.state.send_modify(|state| {
                if let Some(doc) = placeholder {
                    state.doc = Some(doc);
                }
                state.deleted = false;
                state.query_state = QueryState::Loading;
            });
            self.last_id = Some(id.to_string());
        }

        let unchanged = self
            .active
            .as_ref()
            .is_some_and(|active| active.session.id == id && active.session.options == options);
        if !unchanged {
            self.start(id.to_string(), options);
        }
        self.state()
    }

    fn start(&mut self, id: DocumentId, options: GetOptions) {
        self.active = None;

        let session = Rc::new(DocSession {
            store: Rc::clone(&self.store),
            id,
            options,
            liveness: Liveness::new(),
            phase: Cell::new(FetchPhase::Idle),
            epoch: Cell::new(0),
            state: Rc::clone(&self.state),
        });

        let weak = Rc::downgrade(&session);
        let subscription = self.subscriptions.subscribe_to_docs(
            Some(BTreeSet::from([session.id.clone()])),
            move |notification| {
                if let Some(session) = weak.upgrade() {
                    match notification {
                        Notification::Change(change) => session.on_change(change),
                        Notification::Resync => session.fetch(),
                    }
                }
            },
        );

        session.fetch();
        self.active = Some(ActiveDoc {
            session,
            _subscription: subscription,
        });
    }

    /// Fetch the current id again. Coalesces with a fetch in flight.
    pub fn refresh(&self) {
        if let Some(active) = &self.active {
            active.session.fetch();
        }
    }

    /// Stop watching. Pending fetches and change events become no-ops.
    pub fn close(&mut self) {
        self.active = None;
    }

    /// Current phase of the active session's fetch cycle.
    pub fn fetch_phase(&self) -> FetchPhase {
        self.active
            .as_ref()
            .map(|active| active.session.phase.get())
            .unwrap_or_default()
    }

    pub fn id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.session.id.as_str())
    }

    pub fn state(&self) -> DocumentViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DocumentViewState> {
        self.state.subscribe()
    }

    /// Wait until the view is no longer `Loading` and return that state.
    /// A closed view never settles, so this returns its state as is.
    pub async fn settled(&self) -> DocumentViewState {
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

struct ActiveDoc<S: DocumentStore + 'static> {
    session: Rc<DocSession<S>>,
    _subscription: Subscription,
}

impl<S: DocumentStore + 'static> Drop for ActiveDoc<S> {
    fn drop(&mut self) {
        self.session.liveness.cancel();
    }
}

struct DocSession<S: DocumentStore + 'static> {
    store: Rc<S>,
    id: DocumentId,
    options: GetOptions,
    liveness: Liveness,
    phase: Cell<FetchPhase>,
    /// Bumped whenever the change feed commits a document. A get issued
    /// under an older epoch may have read an older revision.
    epoch: Cell<u64>,
    state: Rc<watch::Sender<DocumentViewState>>,
}

impl<S: DocumentStore + 'static> DocSession<S> {
    fn commit(&self, modify: impl FnOnce(&mut DocumentViewState)) -> Result<()> {
        self.liveness.check()?;
        self.state.send_modify(modify);
        Ok(())
    }

    fn mark_loading(&self) -> Result<()> {
        self.commit(|state| state.query_state = QueryState::Loading)
    }

    /// Request a point-get. Requests made while one is outstanding
    /// collapse into a single follow-up get.
    fn fetch(self: &Rc<Self>) {
        if !self.liveness.is_alive() {
            return;
        }

        let mut phase = self.phase.get();
        let action = phase.request();
        self.phase.set(phase);

        match action {
            RequestAction::Issue => {
                if self.mark_loading().is_err() {
                    return;
                }
                log::debug!("Fetching document {}", self.id);
                tokio::task::spawn_local(Rc::clone(self).run_fetches());
            }
            RequestAction::Coalesced => {
                log::debug!("Fetch of {} in flight, refresh coalesced", self.id);
            }
        }
    }

    async fn run_fetches(self: Rc<Self>) {
        loop {
            let issued_at = self.epoch.get();
            let result = self.store.get(&self.id, &self.options).await;

            let committed = if self.epoch.get() != issued_at {
                log::debug!("Change feed overtook fetch of {}, keeping its revision", self.id);
                self.liveness.check()
            } else {
                self.commit(|state| match result {
                    Ok(doc) => {
                        state.doc = Some(doc.shaped(&self.id));
                        state.query_state = QueryState::Done;
                        state.error = None;
                    }
                    Err(e) => {
                        log::debug!("Fetch of {} failed: {e}", self.id);
                        state.query_state = QueryState::Error;
                        state.error = Some(e);
                    }
                })
            };
            if committed.is_err() {
                log::debug!("Discarding fetch result for superseded document {}", self.id);
                return;
            }

            let mut phase = self.phase.get();
            let action = phase.complete();
            self.phase.set(phase);

            match action {
                CompletionAction::Settle => return,
                CompletionAction::Reissue => {
                    log::debug!("Refresh requested during fetch, fetching {} again", self.id);
                    if self.mark_loading().is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn on_change(self: &Rc<Self>, change: &Change) {
        if !self.liveness.is_alive() || change.id != self.id {
            return;
        }

        if change.deleted {
            if self.commit(|state| state.deleted = true).is_err() {
                log::debug!("Dropping deletion of {} for closed view", self.id);
            }
            return;
        }

        match &change.doc {
            Some(doc) if !self.options.needs_store_lookup() => {
                let doc = if self.options.attachments {
                    doc.clone()
                } else {
                    doc.clone().without_attachment_bodies()
                };
                let doc = doc.shaped(&self.id);
                self.epoch.set(self.epoch.get() + 1);
                let committed = self.commit(|state| {
                    state.doc = Some(doc);
                    state.query_state = QueryState::Done;
                    state.error = None;
                    state.deleted = false;
                });
                if committed.is_err() {
                    log::debug!("Dropping update of {} for closed view", self.id);
                }
            }
            Some(_) => {
                log::debug!("Change for {} needs store shaping, fetching", self.id);
                self.fetch();
            }
            None => {
                log::debug!("Change for {} carried no document, fetching", self.id);
                self.fetch();
            }
        }
    }
}
