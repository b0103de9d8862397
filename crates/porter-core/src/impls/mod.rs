//! Impls - ports の実装
//!
//! - **InMemoryTaskStore**: 単一プロセス実行とテスト用の正本
//! - **InMemoryBlobStore**: 認可を検証するテスト用 Blossom
//! - **HttpMediaSource** / **InMemoryMediaSource**: 移行元メディアの取得
//!
//! HTTP の Blossom クライアントは `upload::BlossomClient` にあります。

pub mod inmem_blob;
pub mod inmem_store;
pub mod media;

pub use self::inmem_blob::{BlobFault, InMemoryBlobStore};
pub use self::inmem_store::InMemoryTaskStore;
pub use self::media::{HttpMediaSource, InMemoryMediaSource};
