//! App - アプリケーション層
//!
//! ports を組み合わせて移行パイプラインを組み立てます。
//!
//! # 主要コンポーネント
//! - **PorterConfig**: 実行時設定と起動時検証
//! - **Processor**: 1 タスクを upload -> publish まで進める
//! - **WorkerPool**: 固定数ワーカーの claim ループ
//! - **Migrator**: ジョブの投入・署名者の接続・キャンセル・進捗
//! - **JobProgress**: ジョブの内訳

pub mod config;
pub mod migrator;
pub mod processor;
pub mod status;
pub mod worker_pool;

pub use self::config::{ConfigError, PorterConfig};
pub use self::migrator::{MigrateError, Migrator};
pub use self::processor::{Pipeline, Processor};
pub use self::status::{JobProgress, TaskFailure};
pub use self::worker_pool::WorkerPool;
