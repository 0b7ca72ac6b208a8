// src/recompute.rs

use crate::types::DurationSpan;
use crate::window::elapsed_seconds;
use chrono::{DateTime, Utc};

/// Duração (id, segundos) de cada parada, usando `end_ts` ou `now` se aberta.
pub fn plan(spans: &[DurationSpan], now: DateTime<Utc>) -> Vec<(i64, i64)> {
    spans
        .iter()
        .map(|span| (span.id, elapsed_seconds(span.start_ts, span.end_ts.unwrap_or(now))))
        .collect()
}
