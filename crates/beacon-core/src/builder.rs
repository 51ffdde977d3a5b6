//! PoolBuilder - Pool の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - expect_signals() で「receiver が必ず付いているべき signal」を宣言
//! - build() 時に、期待した signal に receiver が 1 つもなければ BuildError を返す

use tracing::warn;

use crate::config::DispatchConfig;
use crate::error::BoxError;
use crate::pool::Pool;
use crate::receiver::Receiver;
use crate::signal::Signal;

/// PoolBuilder は receiver を接続済みの Pool を組み立てる
///
/// # 使用例
/// ```ignore
/// let pool = PoolBuilder::<String>::new()
///     .config(DispatchConfig::bounded(NonZeroUsize::new(8).unwrap()))
///     .listen("user.created", |_, name| { println!("hello {name}"); Ok(()) })
///     .expect_signals(&["user.created"])
///     .build()?;
/// ```
pub struct PoolBuilder<T> {
    config: DispatchConfig,
    listeners: Vec<(String, Receiver<T>)>,
    expected_signals: Option<Vec<String>>,
}

/// BuildError は Pool 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing receivers for signals: {0:?}. These signals were expected but nothing listens to them.")]
    MissingReceivers(Vec<String>),
}

impl<T: Send + Sync + 'static> PoolBuilder<T> {
    /// 新しい PoolBuilder を作成
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
            listeners: Vec::new(),
            expected_signals: None,
        }
    }

    /// Pool の全 signal で共有する配送設定
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// コールバックを receiver として登録
    pub fn listen<F>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(&Signal<T>, &T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.listeners.push((name.to_string(), Receiver::new(callback)));
        self
    }

    /// 既存の receiver を登録（`Receiver::from_handler` で作ったものなど）
    pub fn receiver(mut self, name: &str, receiver: Receiver<T>) -> Self {
        self.listeners.push((name.to_string(), receiver));
        self
    }

    /// receiver が必ず付いているべき signal を宣言
    pub fn expect_signals(mut self, names: &[&str]) -> Self {
        self.expected_signals = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    /// 新しい Pool に全部を接続して返す
    ///
    /// 別の signal に接続済みの receiver はそのまま残します。
    pub fn build(self) -> Result<Pool<T>, BuildError> {
        let pool = Pool::with_config(self.config);
        for (name, receiver) in &self.listeners {
            if let Err(err) = pool.get(name).connect(std::slice::from_ref(receiver)) {
                warn!(signal = %name, error = %err, "receiver not wired");
            }
        }

        if let Some(expected) = &self.expected_signals {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !pool.contains(name) || pool.get(name).is_empty())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingReceivers(missing));
            }
        }
        Ok(pool)
    }
}

impl<T: Send + Sync + 'static> Default for PoolBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
