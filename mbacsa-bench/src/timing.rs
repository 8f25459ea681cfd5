//! Wall-clock measurement of single protocol round trips.

use std::future::Future;
use std::time::{Duration, Instant};

/// Output of a measured operation together with its elapsed time.
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    /// Elapsed time in microseconds, with sub-microsecond fraction.
    pub fn elapsed_us(&self) -> f64 {
        duration_to_us(self.elapsed)
    }
}

impl<T, E> Timed<std::result::Result<T, E>> {
    /// Split a measured fallible call into `(value, elapsed_us)`.
    ///
    /// The error is returned unchanged and the timing of the failed call is
    /// dropped.
    pub fn transpose(self) -> std::result::Result<(T, f64), E> {
        let elapsed_us = duration_to_us(self.elapsed);
        self.value.map(|value| (value, elapsed_us))
    }
}

/// Run `op` to completion and measure it on the monotonic clock.
///
/// Only the future returned by `op` is inside the measured window; anything
/// the caller does before calling `measure` is excluded.
pub async fn measure<F, Fut, T>(op: F) -> Timed<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let fut = op();
    let start = Instant::now();
    let value = fut.await;
    let elapsed = start.elapsed();
    Timed { value, elapsed }
}

/// Measure a fallible operation, propagating its error unchanged.
pub async fn timed<F, Fut, T, E>(op: F) -> std::result::Result<(T, f64), E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    measure(op).await.transpose()
}

fn duration_to_us(elapsed: Duration) -> f64 {
    elapsed.as_nanos() as f64 / 1e3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_measure_covers_operation() {
        let timed = measure(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            7
        })
        .await;
        assert_eq!(timed.value, 7);
        assert!(timed.elapsed_us() >= 5_000.0);
    }

    #[tokio::test]
    async fn test_timed_propagates_error_unchanged() {
        let result: std::result::Result<(u8, f64), &str> = timed(|| async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));

        let (value, elapsed_us) = timed(|| async { Ok::<_, ()>("ok") }).await.unwrap();
        assert_eq!(value, "ok");
        assert!(elapsed_us >= 0.0);
    }

    #[test]
    fn test_duration_conversion() {
        assert_eq!(duration_to_us(Duration::from_millis(2)), 2000.0);
        assert_eq!(duration_to_us(Duration::from_nanos(1500)), 1.5);
    }
}
