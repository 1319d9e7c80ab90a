pub mod document;
pub mod error;
pub mod fetch;
pub mod liveness;
pub mod options;
pub mod range;
pub mod state;
pub mod store;
pub mod subscription;
pub mod view;

pub use document::{Attachment, Document, DocumentId};
pub use error::{DocViewError, Result};
pub use fetch::{CompletionAction, FetchPhase, RequestAction};
pub use liveness::Liveness;
pub use options::{GetOptions, QueryOptions};
pub use range::could_affect;
pub use state::{DocumentViewState, QueryResponse, QueryState, RowEntry, RowValue, ViewState};
pub use store::{
    Change, ChangeFilter, ChangeStream, DocumentStore, FeedEvent, MemoryStore, StoreStats,
};
pub use subscription::{Notification, Subscription, SubscriptionManager};
pub use view::{DocumentView, InitialValue, RangedView};
