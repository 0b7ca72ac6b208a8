use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Procedência do motivo/comentário de uma parada (PostgreSQL).
///
/// `Auto` vem da ingestão; `Manual` só é atribuído pela justificativa e nenhuma
/// etapa automática volta a escrever esta coluna.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSql, FromSql)]
#[postgres(name = "source_quality")]
pub enum SourceQuality {
    Auto,
    Manual,
}

/// Evento bruto de mudança de status de máquina (externo, somente leitura).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawStatusEvent {
    pub id: i64,
    /// Código externo da máquina (não é o id interno).
    pub machine_code: String,
    pub workorder: Option<String>,
    pub reason_code: String,
    pub ts: DateTime<Utc>,
}

impl From<Row> for RawStatusEvent {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            machine_code: row.get("machine_code"),
            workorder: row.get("workorder"),
            reason_code: row.get("reason_code"),
            ts: row.get("ts"),
        }
    }
}

/// Máquina cadastrada pela superfície de administração.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

impl From<Row> for Machine {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            code: row.get("code"),
            name: row.get("name"),
            is_active: row.get("is_active"),
        }
    }
}

/// Código de motivo de parada.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReasonCode {
    pub id: i64,
    pub code: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl From<Row> for ReasonCode {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            code: row.get("code"),
            description: row.get("description"),
            category: row.get("category"),
        }
    }
}

/// Intervalo de parada reconstruído, propriedade do motor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowntimeEvent {
    pub id: i64,
    /// Chave de idempotência (única).
    pub raw_event_id: i64,
    pub machine_id: i64,
    pub workorder: Option<String>,
    pub raw_reason_code: String,
    pub start_ts: DateTime<Utc>,
    /// `None` enquanto o intervalo estiver aberto.
    pub end_ts: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
    pub reason_code_id: Option<i64>,
    pub comment: Option<String>,
    pub source_quality: SourceQuality,
}

impl DowntimeEvent {
    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }
}

impl From<Row> for DowntimeEvent {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            raw_event_id: row.get("raw_event_id"),
            machine_id: row.get("machine_id"),
            workorder: row.get("workorder"),
            raw_reason_code: row.get("raw_reason_code"),
            start_ts: row.get("start_ts"),
            end_ts: row.get("end_ts"),
            duration_sec: row.get("duration_sec"),
            reason_code_id: row.get("reason_code_id"),
            comment: row.get("comment"),
            source_quality: row.get("source_quality"),
        }
    }
}

/// Linha a ser criada pela ingestão: fim, duração e comentário sempre nulos,
/// procedência sempre `Auto`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDowntimeEvent {
    pub raw_event_id: i64,
    pub machine_id: i64,
    pub workorder: Option<String>,
    pub raw_reason_code: String,
    pub start_ts: DateTime<Utc>,
    pub reason_code_id: Option<i64>,
}

/// Fechamento calculado: o intervalo do evento bruto termina em `end_ts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    pub raw_event_id: i64,
    pub end_ts: DateTime<Utc>,
}

/// Recorte mínimo de uma parada para o recálculo de duração.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSpan {
    pub id: i64,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
}

/// Confirmação devolvida pela justificativa manual.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Justification {
    pub id: i64,
    pub reason_code_id: Option<i64>,
    pub comment: Option<String>,
    pub source_quality: SourceQuality,
}

impl From<Row> for Justification {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            reason_code_id: row.get("reason_code_id"),
            comment: row.get("comment"),
            source_quality: row.get("source_quality"),
        }
    }
}

/// Linha da leitura para relatórios (paradas com máquina e motivo resolvidos).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowntimeEventView {
    pub id: i64,
    pub raw_event_id: i64,
    pub machine_code: Option<String>,
    pub workorder: Option<String>,
    pub raw_reason_code: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
    pub reason_code: Option<String>,
    pub category: Option<String>,
    pub comment: Option<String>,
    pub source_quality: SourceQuality,
}

impl From<Row> for DowntimeEventView {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            raw_event_id: row.get("raw_event_id"),
            machine_code: row.get("machine_code"),
            workorder: row.get("workorder"),
            raw_reason_code: row.get("raw_reason_code"),
            start_ts: row.get("start_ts"),
            end_ts: row.get("end_ts"),
            duration_sec: row.get("duration_sec"),
            reason_code: row.get("reason_code"),
            category: row.get("category"),
            comment: row.get("comment"),
            source_quality: row.get("source_quality"),
        }
    }
}
