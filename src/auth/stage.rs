use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How far a request got through the authorization pipeline.
///
/// `Unauthenticated -> TokenValidated -> PrincipalResolved -> Authorized -> Completed`,
/// with `Rejected` reachable from any step. The middleware stores the current
/// stage in the request extensions and logs it once the response is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Unauthenticated,
    TokenValidated,
    PrincipalResolved,
    Authorized,
    Completed,
    Rejected(RejectedAt),
}

/// The stage a rejected request had reached when it was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedAt {
    Unauthenticated,
    TokenValidated,
    PrincipalResolved,
    Authorized,
}

/// Set by a service once the principal passes the operation's authorization
/// check. The extractor shares it with the request extensions so the
/// middleware can see it after the handler has consumed the principal.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationMark(Arc<AtomicBool>);

impl AuthorizationMark {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl RequestStage {
    /// Moves forward one step. Terminal stages stay where they are.
    pub fn advance(self) -> RequestStage {
        match self {
            RequestStage::Unauthenticated => RequestStage::TokenValidated,
            RequestStage::TokenValidated => RequestStage::PrincipalResolved,
            RequestStage::PrincipalResolved => RequestStage::Authorized,
            RequestStage::Authorized => RequestStage::Completed,
            terminal => terminal,
        }
    }

    pub fn reject(self) -> RequestStage {
        let at = match self {
            RequestStage::Unauthenticated => RejectedAt::Unauthenticated,
            RequestStage::TokenValidated => RejectedAt::TokenValidated,
            RequestStage::PrincipalResolved => RejectedAt::PrincipalResolved,
            RequestStage::Authorized | RequestStage::Completed => RejectedAt::Authorized,
            rejected @ RequestStage::Rejected(_) => return rejected,
        };
        RequestStage::Rejected(at)
    }

    /// Moves a resolved request to `Authorized` if its handler granted access.
    pub fn authorized_if(self, mark: Option<&AuthorizationMark>) -> RequestStage {
        match self {
            RequestStage::PrincipalResolved if mark.is_some_and(AuthorizationMark::is_set) => {
                RequestStage::Authorized
            }
            other => other,
        }
    }

    /// Resolves the final stage from the response status.
    pub fn finish(self, success: bool) -> RequestStage {
        match (self, success) {
            (RequestStage::Rejected(_), _) => self,
            (_, true) => RequestStage::Completed,
            (stage, false) => stage.reject(),
        }
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStage::Unauthenticated => f.write_str("unauthenticated"),
            RequestStage::TokenValidated => f.write_str("token_validated"),
            RequestStage::PrincipalResolved => f.write_str("principal_resolved"),
            RequestStage::Authorized => f.write_str("authorized"),
            RequestStage::Completed => f.write_str("completed"),
            RequestStage::Rejected(at) => write!(f, "rejected at {:?}", at),
        }
    }
}
