use crate::store::StoreError;

/// Errors returned by engine operations. Every variant is a stable kind
/// the surrounding application can map onto a transport response.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("group or member not found")]
    NotFound,
    #[error("only the group leader can do that")]
    Unauthorized,
    #[error("user is already a member of that group")]
    AlreadyMember,
    #[error("user already has a pending invitation")]
    AlreadyInvited,
    #[error("user is already in a party")]
    AlreadyInParty,
    #[error("must be in a party to start quests")]
    NotInParty,
    #[error("quest {0} not found")]
    QuestNotFound(String),
    #[error("party is already on a quest")]
    QuestAlreadyInProgress,
    #[error("no quest invitation is pending")]
    NoPendingInvitation,
    #[error("no quest is active")]
    QuestNotActive,
    #[error("too many concurrent updates, try again")]
    Conflict,
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for GroupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => GroupError::Conflict,
            StoreError::Unavailable(message) => GroupError::StoreUnavailable(message),
        }
    }
}
