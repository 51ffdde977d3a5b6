use serde::Deserialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use beacon_core::{
    BoxError, DispatchConfig, Handler, Pool, PoolBuilder, Receiver, Signal, SignalError,
};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// 最初の n 回だけ失敗する receiver
struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

impl Handler<serde_json::Value> for FlakyHandler {
    fn handle(
        &self,
        signal: &Signal<serde_json::Value>,
        _value: &serde_json::Value,
    ) -> Result<(), BoxError> {
        // 確認と減算は 1 回の CAS で
        match self
            .remaining_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
        {
            Ok(left) => Err(format!("intentional failure on {} (left={left})", signal.name()).into()),
            Err(_) => Ok(()),
        }
    }
}

fn hello(signal: &Signal<serde_json::Value>, value: &serde_json::Value) -> Result<(), BoxError> {
    let p: HelloPayload =
        serde_json::from_value(value.clone()).map_err(|e| format!("json decode: {e}"))?;
    println!("[{}] Hello, {}!", signal.name(), p.name);
    Ok(())
}

fn report(result: Result<(), SignalError>) {
    match result {
        Ok(()) => println!("  -> delivered"),
        Err(err) => match err.composite() {
            Some(composite) => {
                println!("  -> {} ({})", composite.message(), err.as_label());
                for e in composite.errors() {
                    println!("     - {e}");
                }
            }
            None => println!("  -> {err} ({})", err.as_label()),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // (A) Pool を用意（send_async は同時に 4 receiver まで）
    let limit = NonZeroUsize::new(4).ok_or("limit must be non-zero")?;
    let pool: Pool<serde_json::Value> = PoolBuilder::new()
        .config(DispatchConfig::bounded(limit))
        .listen("greet", hello)
        .receiver("greet", Receiver::from_handler(FlakyHandler::new(2)))
        .expect_signals(&["greet"])
        .build()?;

    // (B) 同期 send: 接続順に配送、失敗はまとめて返る
    for attempt in 1..=3 {
        println!("send #{attempt}");
        report(pool.send("greet", &serde_json::json!({ "name": "beacon" })));
    }

    // (C) 存在しない signal / receiver のいない signal
    println!("send to missing signal");
    report(pool.send("missing", &serde_json::json!({})));
    println!("create_or_send to new signal");
    report(pool.create_or_send("fresh", &serde_json::json!({})));

    // (D) 非同期 send: receiver ごとに 1 タスク、完了順に結果が届く
    let counter = Arc::new(AtomicU32::new(0));
    let fan_out = pool.get("fan-out");
    for _ in 0..16 {
        let counter = counter.clone();
        let receiver = Receiver::new(move |_: &Signal<serde_json::Value>, _: &serde_json::Value| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        fan_out.connect(&[receiver])?;
    }
    let mut deliveries = fan_out.send_async(serde_json::json!({ "name": "async" }));
    let mut results = 0;
    while let Some(result) = deliveries.recv().await {
        if let Err(e) = result {
            println!("  async failure: {e}");
        }
        results += 1;
    }
    println!(
        "send_async: results={results} invoked={}",
        counter.load(Ordering::Relaxed)
    );

    // (E) default pool（serde_json::Value で型を合わせなくても共有できる）
    let receiver = beacon_core::listen("global", |_, value| {
        println!("[global] {value}");
        Ok(())
    });
    beacon_core::send("global", &serde_json::json!({ "from": "default pool" }))?;
    receiver.disconnect()?;

    let mut names = pool.names();
    names.sort();
    println!("signals: {names:?}");
    Ok(())
}
