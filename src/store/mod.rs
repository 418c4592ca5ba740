//! Persistent Store (spec §4's leaf dependency): typed services over two
//! SQLite pools (`data.db` for accounts, `cache.db` for everything else).

pub mod accounts;
pub mod chats;
pub mod messages;
pub mod peers;
pub mod rate_limits;
pub mod schema;
pub mod status;

pub use accounts::{Account, AccountStore};
pub use chats::{ChatSyncState, ChatSyncStateStore, ChatType, SyncDirection, SyncPriority};
pub use messages::{MessageRow, MessageStore, MessageType};
pub use peers::{CachedChat, CachedUser, PeerCacheStore};
pub use rate_limits::{ApiActivity, RateLimitStore, RateLimitWindow};
pub use status::StatusStore;
