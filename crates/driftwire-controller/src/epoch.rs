//! Changefeed epoch generation from the upstream time oracle.
//!
//! Epochs tag `info` at each terminal transition so downstream observers
//! can tell a restarted feed from a continuing one. The oracle call is
//! the only suspension point inside a tick; it is bounded by a 5-second
//! deadline and degrades to the local clock rather than failing.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline for the oracle round trip inside a tick.
pub const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bits reserved for the logical counter in the composed timestamp.
const LOGICAL_BITS: u32 = 18;

/// Client for the upstream time oracle.
pub trait TsOracle: Send + Sync {
    /// Fetch the current `(physical_ms, logical_counter)` pair.
    fn get_ts(&self) -> impl Future<Output = anyhow::Result<(i64, i64)>> + Send;
}

/// Compose an oracle `(physical_ms, logical)` pair into the 64-bit
/// timestamp convention: physical milliseconds shifted left 18 bits, the
/// logical counter in the low bits.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn compose_ts(physical_ms: i64, logical: i64) -> u64 {
    ((physical_ms as u64) << LOGICAL_BITS) | (logical as u64 & ((1 << LOGICAL_BITS) - 1))
}

/// Generate a fresh changefeed epoch.
///
/// Falls back to local wall-clock nanoseconds when the oracle errors,
/// misses the deadline, or the surrounding tick is cancelled. Epoch
/// generation itself never fails; successive values from a healthy oracle
/// are strictly increasing.
pub async fn generate_epoch<O: TsOracle>(oracle: &O, cancel: &CancellationToken) -> u64 {
    let fetched = tokio::select! {
        () = cancel.cancelled() => Err(anyhow::anyhow!("tick cancelled")),
        fetched = tokio::time::timeout(ORACLE_TIMEOUT, oracle.get_ts()) => match fetched {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(anyhow::anyhow!("oracle deadline of {ORACLE_TIMEOUT:?} exceeded")),
        },
    };
    match fetched {
        Ok((physical_ms, logical)) => compose_ts(physical_ms, logical),
        Err(err) => {
            tracing::warn!(
                error = %err,
                "generating epoch from the local clock after oracle failure"
            );
            local_epoch()
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn local_epoch() -> u64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
}
