// src/error.rs

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Etapas automáticas de uma execução, na ordem em que rodam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingest,
    Close,
    Recompute,
}

impl Stage {
    pub const ORDERED: [Stage; 3] = [Stage::Ingest, Stage::Close, Stage::Recompute];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Close => "close",
            Stage::Recompute => "recompute",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Justificativa para um evento de parada inexistente (erro do cliente, sem retry).
    #[error("evento de parada {0} não encontrado")]
    NotFound(i64),

    /// Falha de conexão ou de transação; a etapa inteira é desfeita e refeita no próximo ciclo.
    #[error("falha transitória no banco de dados: {0}")]
    Store(String),

    /// Configuração inválida na inicialização; fatal.
    #[error("configuração inválida: {0}")]
    Configuration(String),

    #[error("etapa {stage} excedeu o prazo da execução ({limit:?})")]
    Timeout { stage: Stage, limit: Duration },

    #[error("etapa {stage} falhou: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<SyncError>,
    },

    #[error("já existe uma execução de sincronização em andamento")]
    RunInProgress,
}

impl SyncError {
    /// Erros que o próximo ciclo agendado deve simplesmente refazer.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(_) | SyncError::Timeout { .. } | SyncError::RunInProgress => true,
            SyncError::Stage { source, .. } => source.is_retryable(),
            SyncError::NotFound(_) | SyncError::Configuration(_) => false,
        }
    }

    /// Etapa em que a execução parou, se houver.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SyncError::Timeout { stage, .. } | SyncError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for SyncError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        SyncError::Store(format!("pool: {err}"))
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Configuration(err.to_string())
    }
}
