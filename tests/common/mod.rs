pub mod handlers;
pub mod worker;

pub use handlers::*;
pub use worker::*;

use std::time::Duration;

/// Polls `cond` until it holds, failing the test after ~2 seconds.
///
/// Observer notices travel through a background task, so assertions on
/// sink contents need to wait for delivery.
#[allow(dead_code)]
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
