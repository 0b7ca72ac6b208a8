// src/engine.rs

// Ingestão, fechamento e recálculo, cada uma efetivada antes da seguinte.
// Uma falha interrompe o restante da execução sem desfazer as etapas já
// efetivadas; o próximo ciclo refaz tudo (as etapas são idempotentes).

use crate::config::Config;
use crate::error::{Stage, SyncError};
use crate::ingest::{self, IngestReport};
use crate::justify::{self, JustifyRequest};
use crate::report;
use crate::storage::DowntimeStore;
use crate::types::{DowntimeEventView, Justification};
use crate::window::Window;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Resumo de uma execução completa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// "Agora" usado por todas as janelas desta execução.
    pub now: DateTime<Utc>,
    pub ingest: IngestReport,
    pub closed: u64,
    pub recomputed: u64,
}

pub struct SyncEngine<S: ?Sized> {
    store: Arc<S>,
    ingest_window: Window,
    close_window: Window,
    recompute_window: Window,
    run_timeout: Duration,
    page_size: usize,
    /// Impede duas execuções agendadas simultâneas.
    run_guard: Mutex<()>,
}

impl<S> SyncEngine<S>
where
    S: DowntimeStore + ?Sized,
{
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self {
            store,
            ingest_window: Window::new(config.ingest_window()),
            close_window: Window::new(config.close_window()),
            recompute_window: Window::new(config.recompute_window()),
            run_timeout: config.run_timeout(),
            page_size: config.page_size,
            run_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Executa ingestão, fechamento e recálculo, nessa ordem, dentro do prazo
    /// de uma execução. Rejeita com `RunInProgress` se outra execução estiver
    /// em andamento, neste motor ou em qualquer outro sobre o mesmo armazenamento.
    pub async fn run_once(&self) -> Result<RunReport, SyncError> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            return Err(SyncError::RunInProgress);
        };
        let deadline = Instant::now() + self.run_timeout;

        // A lease conta no prazo da execução, atribuída à primeira etapa.
        let Some(mut lease) = self
            .bounded(Stage::Ingest, deadline, self.store.acquire_run())
            .await?
        else {
            return Err(SyncError::RunInProgress);
        };

        let result = self.run_stages(deadline).await;

        match tokio::time::timeout_at(deadline, lease.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[RUN] Falha ao liberar a lease de execução: {}", e),
            Err(_) => warn!("[RUN] Prazo esgotado ao liberar a lease; liberada no descarte."),
        }
        result
    }

    async fn run_stages(&self, deadline: Instant) -> Result<RunReport, SyncError> {
        let now = self
            .bounded(Stage::Ingest, deadline, self.store.now())
            .await?;

        let started = Instant::now();
        let ingest = self
            .bounded(
                Stage::Ingest,
                deadline,
                self.store.ingest(self.ingest_window.cutoff(now)),
            )
            .await?;
        ingest::log_unresolved(&ingest.unresolved);
        info!(
            "[INGEST] Novas paradas inseridas: {} (máquinas não resolvidas: {}) em {:?}",
            ingest.inserted,
            ingest.skipped_machines(),
            started.elapsed()
        );

        let started = Instant::now();
        let closed = self
            .bounded(
                Stage::Close,
                deadline,
                self.store.close_intervals(self.close_window.cutoff(now)),
            )
            .await?;
        info!("[CLOSE] Paradas fechadas (end_ts): {} em {:?}", closed, started.elapsed());

        let started = Instant::now();
        let recomputed = self
            .bounded(
                Stage::Recompute,
                deadline,
                self.store
                    .recompute_durations(self.recompute_window.cutoff(now), now),
            )
            .await?;
        info!(
            "[RECOMPUTE] Durações atualizadas: {} em {:?}",
            recomputed,
            started.elapsed()
        );

        Ok(RunReport {
            now,
            ingest,
            closed,
            recomputed,
        })
    }

    /// Verifica se o armazenamento responde, devolvendo o relógio dele.
    pub async fn probe(&self) -> Result<DateTime<Utc>, SyncError> {
        self.store.now().await
    }

    /// Justificativa manual; não passa pelo guarda de execução.
    pub async fn justify(&self, request: &JustifyRequest) -> Result<Justification, SyncError> {
        justify::justify_event(self.store.as_ref(), request).await
    }

    pub async fn recent_events(
        &self,
        requested: Option<usize>,
    ) -> Result<Vec<DowntimeEventView>, SyncError> {
        report::recent_events(self.store.as_ref(), requested, self.page_size).await
    }

    async fn bounded<T, F>(&self, stage: Stage, deadline: Instant, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!("[{}] Etapa falhou, execução interrompida: {}", stage, err);
                Err(SyncError::Stage {
                    stage,
                    source: Box::new(err),
                })
            }
            Err(_) => {
                warn!(
                    "[{}] Etapa excedeu o prazo de {:?}; transação desfeita.",
                    stage, self.run_timeout
                );
                Err(SyncError::Timeout {
                    stage,
                    limit: self.run_timeout,
                })
            }
        }
    }
}
