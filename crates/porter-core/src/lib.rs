//! porter-core
//!
//! Migration worker pipeline: source posts in, signed and relay-published Nostr events out.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, task state machine, decision, retry, errors）
//! - **event**: イベントの正規化・id 計算・各 kind のビルダー
//! - **crypto**: secp256k1 Schnorr 鍵と NIP-44 暗号化
//! - **signer**: ローカル / リモート署名
//! - **relay**: リレーのワイヤプロトコルと複数リレーへの配信
//! - **remote**: リモート署名のハンドシェイクとセッション
//! - **upload**: Blossom 認可ヘッダーとクライアント
//! - **ports**: 外部との境界（TaskStore, BlobStore, MediaSource, Clock, IdGenerator）
//! - **impls**: ports の実装（インメモリ / HTTP）
//! - **app**: 設定・Processor・WorkerPool・Migrator

pub mod app;
pub mod crypto;
pub mod domain;
pub mod event;
pub mod impls;
pub mod ports;
pub mod relay;
pub mod remote;
pub mod signer;
pub mod upload;
