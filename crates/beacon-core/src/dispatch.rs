//! Dispatch - send_async のファンアウト
//!
//! # フロー
//! 0. 呼び出し元に runtime がなければ、専用スレッドの current-thread runtime で coordinator を動かす
//! 1. coordinator タスクが signal のロックを取る
//! 2. receiver ごとに 1 タスクを spawn（上限なし、bounded 設定時は Semaphore で同時実行数を制限）
//! 3. ロックを解放（callback 実行中はロックを保持しない）
//! 4. 全タスクの完了を待ちながら結果をチャネルへ流し、最後にチャネルを閉じる

use std::sync::Arc;

use tokio::runtime::{Builder, Handle};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, trace, warn};

use crate::error::{BoxError, CompositeError, SignalError};
use crate::signal::Signal;

/// Deliveries は `Signal::send_async` が返す結果ハンドル
///
/// receiver ごとに 1 件の `Result` を返し、全タスク完了後に `None` を返します。
#[derive(Debug)]
pub struct Deliveries {
    rx: mpsc::UnboundedReceiver<Result<(), BoxError>>,
}

impl Deliveries {
    /// 次の結果を待つ（全件届いたら `None`）
    pub async fn recv(&mut self) -> Option<Result<(), BoxError>> {
        self.rx.recv().await
    }

    /// async コンテキスト外から使うブロッキング版の `recv`
    ///
    /// # Panics
    /// async 実行コンテキストの中から呼んだとき
    pub fn blocking_recv(&mut self) -> Option<Result<(), BoxError>> {
        self.rx.blocking_recv()
    }

    /// 全件受け取り、失敗だけを返す
    pub async fn errors(mut self) -> Vec<BoxError> {
        let mut errors = Vec::new();
        while let Some(result) = self.recv().await {
            if let Err(err) = result {
                errors.push(err);
            }
        }
        errors
    }

    /// 全件受け取り、`Signal::send` と同じ形で失敗をまとめる
    pub async fn finish(self) -> Result<(), SignalError> {
        let errors = self.errors().await;
        if errors.is_empty() {
            return Ok(());
        }
        Err(CompositeError::new(errors).into())
    }
}

pub(crate) fn spawn_fan_out<T>(signal: Signal<T>, value: T) -> Deliveries
where
    T: Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let value = Arc::new(value);
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fan_out(signal, value, tx));
        }
        Err(_) => {
            debug!(signal = %signal.name(), "no runtime, fan-out on a dedicated thread");
            std::thread::spawn(move || match Builder::new_current_thread().build() {
                Ok(runtime) => runtime.block_on(fan_out(signal, value, tx)),
                Err(err) => {
                    // runtime を作れなくても receiver ごとに 1 件は返す
                    warn!(signal = %signal.name(), error = %err, "fan-out runtime unavailable");
                    for _ in signal.receivers() {
                        let _ = tx.send(Err(format!("fan-out runtime unavailable: {err}").into()));
                    }
                }
            });
        }
    }
    Deliveries { rx }
}

async fn fan_out<T>(
    signal: Signal<T>,
    value: Arc<T>,
    tx: mpsc::UnboundedSender<Result<(), BoxError>>,
) where
    T: Send + Sync + 'static,
{
    let limiter = signal
        .config()
        .max_concurrency
        .map(|limit| Arc::new(Semaphore::new(limit.get())));

    let mut units = JoinSet::new();
    {
        let receivers = signal.lock();
        trace!(signal = %signal.name(), receivers = receivers.len(), "send_async");

        for receiver in receivers.iter() {
            let receiver = receiver.clone();
            let signal = signal.clone();
            let value = Arc::clone(&value);
            let limiter = limiter.clone();

            units.spawn(async move {
                // Semaphore は close しないので acquire は失敗しない
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                receiver.receive(&signal, &value)
            });
        }
    }

    while let Some(joined) = units.join_next().await {
        let result = joined.unwrap_or_else(|err| {
            let message = panic_message(err);
            warn!(signal = %signal.name(), %message, "receiver task panicked");
            Err(Box::new(SignalError::ReceiverPanicked(message)) as BoxError)
        });
        // 呼び出し側が Deliveries を drop していても残りの receiver は最後まで実行する
        let _ = tx.send(result);
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::receiver::Receiver;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failing_every(signal: &Signal<String>, count: usize, fail_every: usize) {
        let receivers: Vec<_> = (0..count)
            .map(|i| {
                Receiver::new(move |_: &Signal<String>, value: &String| {
                    if fail_every != 0 && i % fail_every == 0 {
                        return Err(value.clone().into());
                    }
                    Ok(())
                })
            })
            .collect();
        signal.connect(&receivers).unwrap();
    }

    #[tokio::test]
    async fn empty_signal_closes_without_results() {
        let signal: Signal<String> = Signal::new("empty");
        let mut deliveries = signal.send_async("x".to_string());
        assert!(deliveries.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn yields_one_result_per_receiver() {
        let signal = Signal::new("n-results");
        failing_every(&signal, 10, 2);

        let mut deliveries = signal.send_async("boom".to_string());
        let mut ok = 0;
        let mut failed = 0;
        while let Some(result) = deliveries.recv().await {
            match result {
                Ok(()) => ok += 1,
                Err(err) => {
                    assert_eq!(err.to_string(), "boom");
                    failed += 1;
                }
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(failed, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_failing_receivers_are_all_reported() {
        const RECEIVERS: usize = 20_000;

        let signal = Signal::new("fan-out");
        failing_every(&signal, RECEIVERS, 1);

        let errors = signal.send_async("signal message".to_string()).errors().await;
        assert_eq!(errors.len(), RECEIVERS);
    }

    #[tokio::test]
    async fn finish_folds_failures_into_composite() {
        let signal = Signal::new("finish");
        failing_every(&signal, 4, 4);

        let err = signal.send_async("x".to_string()).finish().await.unwrap_err();
        assert_eq!(err.composite().map(CompositeError::len), Some(1));

        let clean = Signal::new("clean");
        failing_every(&clean, 3, 0);
        assert!(clean.send_async("x".to_string()).finish().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_config_caps_running_callbacks() {
        let limit = NonZeroUsize::new(2).unwrap();
        let signal = Signal::with_config("bounded", DispatchConfig::bounded(limit));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let receiver = Receiver::new(move |_: &Signal<u32>, _: &u32| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
            signal.connect(&[receiver]).unwrap();
        }

        signal.send_async(0).finish().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= limit.get());
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_receiver_still_yields_a_result() {
        let signal = Signal::new("panics");
        signal
            .connect(&[
                Receiver::new(|_: &Signal<u32>, _: &u32| Ok(())),
                Receiver::new(|_: &Signal<u32>, _: &u32| panic!("receiver exploded")),
            ])
            .unwrap();

        let errors = signal.send_async(1).errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "receiver panicked: receiver exploded");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callbacks_may_connect_during_async_dispatch() {
        let signal = Signal::new("reentrant");
        let receiver = Receiver::new(|signal: &Signal<u32>, _: &u32| {
            let late = Receiver::new(|_: &Signal<u32>, _: &u32| Ok(()));
            signal.connect(&[late])?;
            Ok(())
        });
        signal.connect(&[receiver]).unwrap();

        signal.send_async(0).finish().await.unwrap();
        assert_eq!(signal.len(), 2);
    }

    #[test]
    fn blocking_recv_outside_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let signal = Signal::new("blocking");
        failing_every(&signal, 3, 3);

        let mut deliveries = runtime.block_on(async { signal.send_async("b".to_string()) });
        let mut results = Vec::new();
        while let Some(result) = deliveries.blocking_recv() {
            results.push(result.is_ok());
        }
        results.sort();
        assert_eq!(results, vec![false, true, true]);
    }

    #[test]
    fn send_async_without_runtime() {
        let signal = Signal::new("no-runtime");
        failing_every(&signal, 4, 2);

        let mut deliveries = signal.send_async("plain thread".to_string());
        let mut failed = 0;
        let mut total = 0;
        while let Some(result) = deliveries.blocking_recv() {
            total += 1;
            if result.is_err() {
                failed += 1;
            }
        }
        assert_eq!(total, 4);
        assert_eq!(failed, 2);

        let empty: Signal<String> = Signal::new("no-runtime-empty");
        assert!(empty.send_async("x".to_string()).blocking_recv().is_none());
    }
}
