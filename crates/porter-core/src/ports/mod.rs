//! Ports - 抽象化レイヤー
//!
//! ワーカーパイプラインが外部と話す境界の trait 群です。
//! 実装は `impls`（メモリ上 / HTTP）と `upload`（Blossom クライアント）にあります。

pub mod blob_store;
pub mod clock;
pub mod id_generator;
pub mod media_source;
pub mod task_store;

pub use self::blob_store::{BlobDescriptor, BlobStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::media_source::{FetchError, FetchedMedia, MediaSource};
pub use self::task_store::{StoreError, TaskStore};
