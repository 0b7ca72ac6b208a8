// src/window.rs

// Todas as etapas reconsideram apenas uma janela que termina em "agora".
// A fronteira é inclusiva: um registro com timestamp exatamente igual a
// `agora - lookback` ainda pertence à janela.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Janela retroativa de duração fixa a partir de "agora".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    lookback: Duration,
}

impl Window {
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }

    /// Menor timestamp ainda dentro da janela.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let delta = TimeDelta::from_std(self.lookback).unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(delta)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        ts >= self.cutoff(now)
    }
}

/// Segundos inteiros decorridos entre `start` e `end`, truncados e nunca negativos.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0)
}
