//! beacon-core
//!
//! In-process signal/slot building blocks.
//!
//! # モジュール構成
//! - **receiver**: コールバックを包むハンドル（Receiver, ReceiverId, Handler trait）
//! - **signal**: 名前付きチャネル（connect / disconnect / clear / send / send_async）
//! - **dispatch**: send_async のファンアウトと結果ハンドル（Deliveries）
//! - **pool**: 名前 → Signal のレジストリ（get-or-create, send_global など）
//! - **builder**: Pool の構築と起動時検証（PoolBuilder）
//! - **config**: 配送設定（DispatchConfig）
//! - **error**: エラー型（SignalError, CompositeError）
//! - **global**: プロセス全体の default pool と省略形の関数

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod global;
pub mod pool;
pub mod receiver;
pub mod signal;

pub use self::builder::{BuildError, PoolBuilder};
pub use self::config::DispatchConfig;
pub use self::dispatch::Deliveries;
pub use self::error::{BoxError, CompositeError, SignalError};
pub use self::global::{default_pool, get, listen, send};
pub use self::pool::Pool;
pub use self::receiver::{Handler, Receiver, ReceiverId};
pub use self::signal::Signal;
