use anyhow::{Context, Result, bail};
use downtime_sync::{Config, DowntimeStore, JustifyRequest, Storage, SyncEngine, scheduler};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Modos de execução do binário.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Loop agendado (padrão).
    Daemon,
    /// Uma única execução, para agendamento externo (cron).
    Once,
    /// Verifica conexão e relógio do banco.
    Check,
    /// Lista as paradas mais recentes em JSON.
    Recent(Option<usize>),
    /// Cadastros lidos pelo motor.
    Machines,
    ReasonCodes,
    Justify(JustifyRequest),
}

fn parse_command(args: &[String]) -> Result<Command> {
    match args {
        [] => Ok(Command::Daemon),
        [flag] if flag == "--once" => Ok(Command::Once),
        [flag] if flag == "--check" => Ok(Command::Check),
        [flag] if flag == "--recent" => Ok(Command::Recent(None)),
        [flag] if flag == "--machines" => Ok(Command::Machines),
        [flag] if flag == "--reasons" => Ok(Command::ReasonCodes),
        [flag, limit] if flag == "--recent" => Ok(Command::Recent(Some(
            limit.parse().context("limite de --recent inválido")?,
        ))),
        [flag, event_id, reason_code_id, comment @ ..] if flag == "--justify" => {
            Ok(Command::Justify(JustifyRequest {
                event_id: event_id.parse().context("id do evento inválido")?,
                reason_code_id: reason_code_id.parse().context("id do motivo inválido")?,
                comment: (!comment.is_empty()).then(|| comment.join(" ")),
            }))
        }
        _ => bail!(
            "uso: downtime-sync [--once | --check | --recent [N] | --machines | --reasons | --justify <evento> <motivo> [comentário]]"
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializa o sistema de logging (tracing)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    // Carrega e valida a configuração; configuração inválida impede a partida
    let config = Config::load().context("falha ao carregar a configuração")?;
    info!(
        "Configuração carregada: janelas ingest={}s close={}s recompute={}s, ciclo a cada {}s, prazo {}s",
        config.ingest_window_secs,
        config.close_window_secs,
        config.recompute_window_secs,
        config.run_interval_secs,
        config.run_timeout_secs
    );

    let storage = Arc::new(Storage::connect(&config).await?);
    if config.bootstrap_schema {
        storage.bootstrap_schema().await?;
        info!("Esquema do banco verificado");
    }
    let engine = Arc::new(SyncEngine::new(storage, &config));

    match command {
        Command::Daemon => {
            let shutdown = CancellationToken::new();
            let ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Sinal de encerramento recebido");
                    ctrl_c.cancel();
                }
            });
            scheduler::run_scheduler(engine, config.run_interval(), shutdown).await;
        }
        Command::Once => match engine.run_once().await {
            Ok(report) => info!(
                "Sincronização concluída: {} inseridas, {} fechadas, {} durações",
                report.ingest.inserted, report.closed, report.recomputed
            ),
            Err(e) => {
                error!("Sincronização falhou: {}", e);
                return Err(e.into());
            }
        },
        Command::Check => {
            let db_time = engine.probe().await?;
            println!("{}", serde_json::json!({ "status": "ok", "db_time": db_time }));
        }
        Command::Recent(limit) => {
            let rows = engine.recent_events(limit).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Machines => {
            let machines = engine.store().list_machines().await?;
            println!("{}", serde_json::to_string_pretty(&machines)?);
        }
        Command::ReasonCodes => {
            let codes = engine.store().list_reason_codes().await?;
            println!("{}", serde_json::to_string_pretty(&codes)?);
        }
        Command::Justify(request) => {
            let confirmed = engine.justify(&request).await?;
            println!("{}", serde_json::to_string_pretty(&confirmed)?);
        }
    }

    Ok(())
}
