// Fetch coalescing - at most one store query in flight per view

/// Phase of a view's refetch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPhase {
    #[default]
    Idle,
    Fetching,
    /// A fetch is in flight and at least one more is owed once it lands.
    FetchingPendingRefresh,
}

/// What the caller must do after [`FetchPhase::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    /// Issue a store query now.
    Issue,
    /// A query is already running; the request was folded into a follow-up.
    Coalesced,
}

/// What the caller must do after [`FetchPhase::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    /// Nothing owed; the view is idle.
    Settle,
    /// Changes arrived during the fetch; issue another query now.
    Reissue,
}

impl FetchPhase {
    /// Record a refetch request.
    pub fn request(&mut self) -> RequestAction {
        match self {
            FetchPhase::Idle => {
                *self = FetchPhase::Fetching;
                RequestAction::Issue
            }
            FetchPhase::Fetching | FetchPhase::FetchingPendingRefresh => {
                *self = FetchPhase::FetchingPendingRefresh;
                RequestAction::Coalesced
            }
        }
    }

    /// Record that the in-flight query finished, successfully or not.
    pub fn complete(&mut self) -> CompletionAction {
        match self {
            FetchPhase::FetchingPendingRefresh => {
                *self = FetchPhase::Fetching;
                CompletionAction::Reissue
            }
            FetchPhase::Fetching => {
                *self = FetchPhase::Idle;
                CompletionAction::Settle
            }
            FetchPhase::Idle => {
                log::warn!("Fetch completion reported while no fetch was in flight");
                CompletionAction::Settle
            }
        }
    }

    pub fn is_fetching(&self) -> bool {
        !matches!(self, FetchPhase::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_issues() {
        let mut phase = FetchPhase::default();
        assert_eq!(phase.request(), RequestAction::Issue);
        assert_eq!(phase, FetchPhase::Fetching);
        assert_eq!(phase.complete(), CompletionAction::Settle);
        assert_eq!(phase, FetchPhase::Idle);
    }

    #[test]
    fn test_requests_during_fetch_coalesce_into_one() {
        let mut phase = FetchPhase::default();
        phase.request();
        assert_eq!(phase.request(), RequestAction::Coalesced);
        assert_eq!(phase.request(), RequestAction::Coalesced);
        assert_eq!(phase, FetchPhase::FetchingPendingRefresh);

        assert_eq!(phase.complete(), CompletionAction::Reissue);
        assert_eq!(phase, FetchPhase::Fetching);
        assert_eq!(phase.complete(), CompletionAction::Settle);
        assert!(!phase.is_fetching());
    }

    #[test]
    fn test_request_after_reissue_is_owed_again() {
        let mut phase = FetchPhase::default();
        phase.request();
        phase.request();
        phase.complete();
        assert_eq!(phase.request(), RequestAction::Coalesced);
        assert_eq!(phase.complete(), CompletionAction::Reissue);
    }

    #[test]
    fn test_stray_completion_is_harmless() {
        let mut phase = FetchPhase::Idle;
        assert_eq!(phase.complete(), CompletionAction::Settle);
        assert_eq!(phase, FetchPhase::Idle);
    }
}
