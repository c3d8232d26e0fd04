pub mod audit;
pub mod config;
pub mod errors;
pub mod ids;
pub mod mentions;
pub mod model;
pub mod outbound;
pub mod perms;
pub mod persistence;
pub mod protocol;
pub mod room;
pub mod sendhealth;
pub mod validation;

pub use config::RoomConfig;
pub use errors::{PersistenceError, PersistenceResult, RoomError, RoomResult};
pub use ids::{ChannelId, ChannelIdGen, ClientId, ClientIdGen, MsgId, MsgIdGen};
pub use model::{
    AuditLogEntry, BanRecord, Channel, ChannelListItem, Client, ClientSummary, FileAttachment,
    IceServer, Message, ReplyPreview,
};
pub use outbound::OutboundSink;
pub use perms::{has_permission, min_role, Action, Role};
pub use persistence::{PersistenceStore, SqliteStore};
pub use protocol::{ClientMessage, ReplayCursor, ServerMessage};
pub use room::{validate_chat, ReplacedClient, Room};
pub use sendhealth::{BreakerParams, SendHealth};
pub use validation::validate_name;
