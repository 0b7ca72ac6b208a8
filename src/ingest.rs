// src/ingest.rs

// A resolução de máquina e de motivo é feita aqui; a garantia de no máximo
// uma parada por evento bruto fica com a camada de armazenamento (restrição
// de unicidade em `raw_event_id`), nunca com este planejamento.

use crate::types::{NewDowntimeEvent, RawStatusEvent};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Referência de um evento bruto que não pôde ser resolvida. Não é erro:
/// fica registrada para visibilidade do operador e o processamento segue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// Código de máquina desconhecido: o evento bruto é ignorado.
    Machine { raw_event_id: i64, machine_code: String },
    /// Código de motivo desconhecido: a parada é criada com motivo nulo.
    ReasonCode { raw_event_id: i64, reason_code: String },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Machine { raw_event_id, machine_code } => write!(
                f,
                "evento bruto {raw_event_id}: máquina '{machine_code}' não cadastrada"
            ),
            Unresolved::ReasonCode { raw_event_id, reason_code } => write!(
                f,
                "evento bruto {raw_event_id}: motivo '{reason_code}' não cadastrado"
            ),
        }
    }
}

/// Resultado do planejamento da ingestão.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestPlan {
    pub rows: Vec<NewDowntimeEvent>,
    pub unresolved: Vec<Unresolved>,
}

/// Resultado de uma ingestão efetivada.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Paradas efetivamente criadas (duplicatas ignoradas não contam).
    pub inserted: u64,
    pub unresolved: Vec<Unresolved>,
}

impl IngestReport {
    pub fn skipped_machines(&self) -> usize {
        self.unresolved
            .iter()
            .filter(|u| matches!(u, Unresolved::Machine { .. }))
            .count()
    }
}

/// Monta as novas paradas a partir dos eventos brutos sem correspondente.
///
/// - `machines`: código externo → id interno.
/// - `reason_codes`: código → id; ausência deixa `reason_code_id` nulo.
pub fn plan(
    raw_events: &[RawStatusEvent],
    machines: &HashMap<String, i64>,
    reason_codes: &HashMap<String, i64>,
) -> IngestPlan {
    let mut plan = IngestPlan::default();

    for event in raw_events {
        let Some(&machine_id) = machines.get(&event.machine_code) else {
            plan.unresolved.push(Unresolved::Machine {
                raw_event_id: event.id,
                machine_code: event.machine_code.clone(),
            });
            continue;
        };

        let reason_code_id = reason_codes.get(&event.reason_code).copied();
        if reason_code_id.is_none() {
            plan.unresolved.push(Unresolved::ReasonCode {
                raw_event_id: event.id,
                reason_code: event.reason_code.clone(),
            });
        }

        plan.rows.push(NewDowntimeEvent {
            raw_event_id: event.id,
            machine_id,
            workorder: event.workorder.clone(),
            raw_reason_code: event.reason_code.clone(),
            start_ts: event.ts,
            reason_code_id,
        });
    }

    plan
}

/// Registra as referências não resolvidas: máquina em `warn`, motivo em `debug`
/// (códigos como "RUNNING" normalmente não têm motivo cadastrado).
pub fn log_unresolved(unresolved: &[Unresolved]) {
    for item in unresolved {
        match item {
            Unresolved::Machine { .. } => warn!("[INGEST] {}", item),
            Unresolved::ReasonCode { .. } => debug!("[INGEST] {}", item),
        }
    }
}
