// src/scheduler.rs

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::storage::DowntimeStore;
use std::{sync::Arc, time::Duration, time::Instant};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DATABASE_RETRY: Duration = Duration::from_secs(10);

/// Enum de estados do scheduler: aguardando banco ou sincronizando.
enum SchedulerState {
    WaitingForDatabase,
    Syncing,
}

/// Função auxiliar para checar se o banco responde.
async fn check_database<S>(engine: &SyncEngine<S>) -> bool
where
    S: DowntimeStore + ?Sized,
{
    match engine.probe().await {
        Ok(db_time) => {
            info!("[SCHEDULER] Banco de dados disponível (relógio do banco: {}).", db_time);
            true
        }
        Err(e) => {
            warn!("[SCHEDULER] Banco de dados indisponível: {}", e);
            false
        }
    }
}

/// Scheduler principal: espera o banco responder, depois executa a
/// sincronização a cada `run_interval` até o token ser cancelado.
///
/// Retorna o número de ciclos disparados.
pub async fn run_scheduler<S>(
    engine: Arc<SyncEngine<S>>,
    run_interval: Duration,
    shutdown: CancellationToken,
) -> u64
where
    S: DowntimeStore + ?Sized,
{
    let mut state = SchedulerState::WaitingForDatabase;
    let mut cycle_number: u64 = 0;

    loop {
        match state {
            SchedulerState::WaitingForDatabase => {
                info!("[ESTADO: AGUARDANDO BANCO] Verificando conexão...");
                if check_database(&engine).await {
                    info!("[ESTADO: SINCRONIZANDO] Iniciando ciclos a cada {:?}.", run_interval);
                    state = SchedulerState::Syncing;
                } else {
                    warn!(
                        "Banco não disponível. Nova tentativa em {:?}...",
                        DATABASE_RETRY
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(DATABASE_RETRY) => {}
                    }
                }
            }
            SchedulerState::Syncing => {
                let mut ticker = interval(run_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    cycle_number += 1;
                    let cycle_start = Instant::now();
                    info!("[CICLO {}] Iniciando sincronização de paradas.", cycle_number);

                    let run = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            warn!("[CICLO {}] Encerrando no meio da execução; etapa em curso desfeita.", cycle_number);
                            break;
                        }
                        run = engine.run_once() => run,
                    };

                    match run {
                        Ok(report) => {
                            debug!("[CICLO {}] Relógio da execução: {}", cycle_number, report.now);
                            info!(
                                "[CICLO {}] Fim do ciclo: {} inseridas, {} fechadas, {} durações. Duração: {:?}",
                                cycle_number,
                                report.ingest.inserted,
                                report.closed,
                                report.recomputed,
                                cycle_start.elapsed()
                            );
                        }
                        Err(SyncError::RunInProgress) => {
                            warn!("[CICLO {}] Execução anterior ainda em andamento; ciclo ignorado.", cycle_number);
                        }
                        Err(e) => {
                            error!(
                                "[CICLO {}] Ciclo falhou ({}); será refeito no próximo ciclo.",
                                cycle_number, e
                            );
                        }
                    }
                }
                break;
            }
        }
    }

    info!("[SCHEDULER] Encerrado após {} ciclos.", cycle_number);
    cycle_number
}
