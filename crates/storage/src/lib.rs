pub mod error;
pub mod feed;
pub mod local;
pub mod remote;
pub mod schema;

pub use error::StorageError;
pub use feed::{ChangeFeed, Subscription};
pub use local::{LocalStore, SqliteLocalStore, keys, read_collection, write_collection};
pub use remote::{ChangeEvent, RemoteHandles, RemoteTable, TableHandle};
