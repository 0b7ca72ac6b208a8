// src/report.rs

// Leitura limitada das paradas para a superfície de relatórios.

use crate::error::SyncError;
use crate::storage::DowntimeStore;
use crate::types::DowntimeEventView;

/// Paradas mais recentes primeiro. O limite pedido é sempre contido em
/// `1..=page_size` para que a leitura nunca vire uma varredura completa.
pub async fn recent_events<S>(
    store: &S,
    requested: Option<usize>,
    page_size: usize,
) -> Result<Vec<DowntimeEventView>, SyncError>
where
    S: DowntimeStore + ?Sized,
{
    let page_size = page_size.max(1);
    let limit = requested.unwrap_or(page_size).clamp(1, page_size);
    store.recent_events(limit).await
}
