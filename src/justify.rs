// src/justify.rs

// Escreve apenas `reason_code_id`, `comment` e `source_quality`, colunas que
// nenhuma etapa automática toca. Por isso pode rodar a qualquer momento, sem
// esperar a execução agendada.

use crate::error::SyncError;
use crate::storage::DowntimeStore;
use crate::types::Justification;
use serde::Deserialize;
use tracing::{info, warn};

/// Pedido de justificativa vindo da superfície de administração.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JustifyRequest {
    pub event_id: i64,
    pub reason_code_id: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn justify_event<S>(
    store: &S,
    request: &JustifyRequest,
) -> Result<Justification, SyncError>
where
    S: DowntimeStore + ?Sized,
{
    let comment = request.comment.as_deref().unwrap_or("");
    match store
        .justify(request.event_id, request.reason_code_id, comment)
        .await
    {
        Ok(justification) => {
            info!(
                "[JUSTIFY] Parada {} justificada com motivo {}.",
                justification.id, request.reason_code_id
            );
            Ok(justification)
        }
        Err(err @ SyncError::NotFound(_)) => {
            warn!("[JUSTIFY] {}", err);
            Err(err)
        }
        Err(err) => Err(err),
    }
}
