use thiserror::Error;

pub type RoomResult<T> = Result<T, RoomError>;

/// Errors a caller (SessionHandler) needs to branch on. Validation and permission
/// failures are deliberately coarse — the dispatch contract silently drops those,
/// it never surfaces *why* to the wire.
#[derive(Error, Debug)]
pub enum RoomError {
    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("already exists: {0}")]
    AlreadyExists(&'static str),

    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("failed precondition: {0}")]
    FailedPrecondition(&'static str),

    #[error("slow mode: channel {0:?} not elapsed")]
    SlowMode(crate::ids::ChannelId),

    #[error("channel full")]
    ChannelFull,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration {0} failed: {1}")]
    Migration(u32, String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
