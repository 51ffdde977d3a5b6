//! Receiver - コールバックを包むハンドル
//!
//! # 学習ポイント
//! - プロセス全体の `AtomicU64` カウンタによる ID 採番（アドレス由来の ID は使わない）
//! - `Weak` による signal への逆参照（signal ↔ receiver の循環参照を避ける）
//! - Generic trait (`Handler<T>`) → `Arc<dyn Fn>` への type erasure

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BoxError, SignalError};
use crate::signal::{Signal, WeakSignal};

static NEXT_RECEIVER_ID: AtomicU64 = AtomicU64::new(1);

/// ReceiverId は receiver の不変な識別子
///
/// プロセス全体のカウンタから一度だけ採番されるので、
/// 生きている receiver 同士で重複せず、再利用もされません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(u64);

impl ReceiverId {
    fn next() -> Self {
        Self(NEXT_RECEIVER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receiver-{}", self.0)
    }
}

/// Handler は struct として receiver のロジックを書くための trait
///
/// # 使用例
/// ```ignore
/// struct Audit;
///
/// impl Handler<String> for Audit {
///     fn handle(&self, signal: &Signal<String>, value: &String) -> Result<(), BoxError> {
///         println!("{}: {value}", signal.name());
///         Ok(())
///     }
/// }
///
/// let receiver = Receiver::from_handler(Audit);
/// ```
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, signal: &Signal<T>, value: &T) -> Result<(), BoxError>;
}

type Callback<T> = Arc<dyn Fn(&Signal<T>, &T) -> Result<(), BoxError> + Send + Sync>;

/// Receiver は 1 つのコールバックを包むハンドル
///
/// clone は安価で、clone 同士は ID と逆参照を共有します。
pub struct Receiver<T>(Arc<ReceiverInner<T>>);

struct ReceiverInner<T> {
    id: ReceiverId,
    callback: Callback<T>,
    signal: Mutex<Option<WeakSignal<T>>>,
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Send + Sync + 'static> Receiver<T> {
    /// クロージャから新しい Receiver を作成
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Signal<T>, &T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(ReceiverInner {
            id: ReceiverId::next(),
            callback: Arc::new(callback),
            signal: Mutex::new(None),
        }))
    }

    /// Handler 実装から Receiver を作成
    pub fn from_handler<H: Handler<T>>(handler: H) -> Self {
        Self::new(move |signal: &Signal<T>, value: &T| handler.handle(signal, value))
    }

    pub fn id(&self) -> ReceiverId {
        self.0.id
    }

    /// コールバックを呼び出し、結果をそのまま返す
    pub fn receive(&self, signal: &Signal<T>, value: &T) -> Result<(), BoxError> {
        (self.0.callback)(signal, value)
    }

    /// 接続先の signal（まだ生きていれば）
    pub fn signal(&self) -> Option<Signal<T>> {
        self.slot().as_ref().and_then(WeakSignal::upgrade)
    }

    /// 逆参照を上書きし、更新後の値を返す
    ///
    /// 手で設定しても signal の receiver 一覧には追加・削除されません。
    pub fn set_signal(&self, signal: Option<&Signal<T>>) -> Option<Signal<T>> {
        let mut slot = self.slot();
        *slot = signal.map(Signal::downgrade);
        signal.cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.signal().is_some()
    }

    /// 現在の signal から切断
    ///
    /// 接続先がなければ `NotConnected`。2 回目の呼び出しもエラーになります。
    pub fn disconnect(&self) -> Result<(), SignalError> {
        let signal = self
            .slot()
            .take()
            .and_then(|weak| weak.upgrade())
            .ok_or(SignalError::NotConnected)?;
        signal.disconnect(std::slice::from_ref(self));
        Ok(())
    }

    /// 逆参照を `signal` に向ける
    ///
    /// 別の生きている signal を指していれば `AlreadyConnected`。
    /// 重複判定は呼び出し側（signal の receiver 一覧）で行う。
    pub(crate) fn attach(&self, signal: &Signal<T>) -> Result<(), SignalError> {
        let mut slot = self.slot();
        if let Some(current) = slot.as_ref().and_then(WeakSignal::upgrade) {
            if !current.ptr_eq(signal) {
                return Err(SignalError::AlreadyConnected {
                    receiver: self.id(),
                    signal: current.name().to_string(),
                });
            }
        }
        *slot = Some(signal.downgrade());
        Ok(())
    }

    /// 逆参照が `signal` を指している場合だけクリア
    pub(crate) fn detach_from(&self, signal: &Signal<T>) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|weak| weak.points_to(signal)) {
            *slot = None;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<WeakSignal<T>>> {
        self.0.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> PartialEq for Receiver<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl<T> Eq for Receiver<T> {}

impl<T: Send + Sync + 'static> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signal = self.signal().map(|s| s.name().to_string());
        f.debug_struct("Receiver")
            .field("id", &self.id())
            .field("signal", &signal)
            .finish()
    }
}
