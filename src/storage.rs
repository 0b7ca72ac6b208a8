// src/storage.rs

// Cada etapa automática é uma transação própria: leitura, planejamento e
// escrita são efetivados juntos ou não são efetivados. Se o futuro da etapa
// for descartado (prazo da execução), a transação é desfeita no drop.
// Execuções inteiras são serializadas entre processos pela lease de execução.

use crate::config::Config;
use crate::error::SyncError;
use crate::ingest::{self, IngestReport};
use crate::types::{DowntimeEventView, Justification, Machine, RawStatusEvent, ReasonCode};
use crate::closer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::collections::HashMap;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

/// Chave do advisory lock de sessão que serializa execuções de processos diferentes.
const RUN_LOCK_KEY: i64 = 0x646f_776e_7469_6d65;

/// DDL da tabela de paradas e das tabelas externas lidas pelo motor.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Operações de que o motor precisa sobre o armazenamento durável.
///
/// Contrato de escrita por colunas:
/// - `ingest` só insere linhas novas (duplicata de `raw_event_id` é ignorada).
/// - `close_intervals` só escreve `end_ts`, e só quando ainda é nulo.
/// - `recompute_durations` só escreve `duration_sec`.
/// - `justify` só escreve `reason_code_id`, `comment` e `source_quality`.
/// Exclusividade de uma execução completa (ingestão, fechamento, recálculo).
///
/// `release` devolve a exclusividade de forma ordenada. Se a lease for
/// descartada sem `release` (prazo estourado, erro), cada implementação
/// garante a liberação no drop.
#[async_trait]
pub trait RunLease: Send {
    async fn release(&mut self) -> Result<(), SyncError>;
}

#[async_trait]
pub trait DowntimeStore: Send + Sync {
    /// Tenta obter a exclusividade de execução; `None` se outra execução,
    /// deste ou de outro processo, já a detém.
    async fn acquire_run(&self) -> Result<Option<Box<dyn RunLease>>, SyncError>;

    /// Relógio de referência das janelas.
    async fn now(&self) -> Result<DateTime<Utc>, SyncError>;

    async fn ingest(&self, since: DateTime<Utc>) -> Result<IngestReport, SyncError>;

    /// Retorna quantos intervalos foram fechados.
    async fn close_intervals(&self, since: DateTime<Utc>) -> Result<u64, SyncError>;

    /// Retorna quantas durações foram gravadas.
    async fn recompute_durations(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, SyncError>;

    async fn justify(
        &self,
        event_id: i64,
        reason_code_id: i64,
        comment: &str,
    ) -> Result<Justification, SyncError>;

    /// Paradas mais recentes primeiro, no máximo `limit`.
    async fn recent_events(&self, limit: usize) -> Result<Vec<DowntimeEventView>, SyncError>;

    async fn list_machines(&self) -> Result<Vec<Machine>, SyncError>;

    async fn list_reason_codes(&self) -> Result<Vec<ReasonCode>, SyncError>;
}

pub struct Storage {
    pool: Pool,
}

/// Conexão dedicada que segura `pg_try_advisory_lock(RUN_LOCK_KEY)`.
struct PgRunLease {
    client: Option<Object>,
}

#[async_trait]
impl RunLease for PgRunLease {
    async fn release(&mut self) -> Result<(), SyncError> {
        if let Some(client) = &self.client {
            client
                .execute("SELECT pg_advisory_unlock($1)", &[&RUN_LOCK_KEY])
                .await?;
        }
        // só depois do unlock a conexão pode voltar ao pool
        self.client = None;
        Ok(())
    }
}

impl Drop for PgRunLease {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Conexão retirada do pool e fechada: a sessão termina e o lock é solto.
            warn!("[STORAGE] Lease de execução descartada sem liberação; conexão encerrada.");
            drop(Object::take(client));
        }
    }
}

impl Storage {
    pub async fn connect(config: &Config) -> Result<Self, SyncError> {
        let mut pg = deadpool_postgres::Config::new();
        pg.url = Some(config.database_url.clone());
        pg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg.pool = Some(PoolConfig::new(config.pool_max_size));
        let pool = pg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SyncError::Configuration(format!("pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Cria as tabelas ausentes, incluindo a restrição única de `raw_event_id`.
    pub async fn bootstrap_schema(&self) -> Result<(), SyncError> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    async fn lookup_ids(
        tx: &tokio_postgres::Transaction<'_>,
        sql: &str,
        codes: Vec<String>,
    ) -> Result<HashMap<String, i64>, SyncError> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = tx.query(sql, &[&codes]).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<_, String>("code"), row.get::<_, i64>("id")))
            .collect())
    }
}

#[async_trait]
impl DowntimeStore for Storage {
    async fn acquire_run(&self) -> Result<Option<Box<dyn RunLease>>, SyncError> {
        let mut lease = PgRunLease {
            client: Some(self.pool.get().await?),
        };
        let locked: bool = match &lease.client {
            Some(client) => client
                .query_one("SELECT pg_try_advisory_lock($1) AS locked", &[&RUN_LOCK_KEY])
                .await?
                .get("locked"),
            None => false,
        };
        if !locked {
            // sem lock na sessão: a conexão pode voltar ao pool normalmente
            lease.client = None;
            return Ok(None);
        }
        Ok(Some(Box::new(lease)))
    }

    async fn now(&self) -> Result<DateTime<Utc>, SyncError> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT now() AS now", &[]).await?;
        Ok(row.get("now"))
    }

    async fn ingest(&self, since: DateTime<Utc>) -> Result<IngestReport, SyncError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let raw_events: Vec<RawStatusEvent> = tx
            .query(
                r#"
                SELECT e.id, e.machine_code, e.workorder, e.reason_code, e.ts
                FROM machine_status_event e
                LEFT JOIN downtime_event d ON d.raw_event_id = e.id
                WHERE d.raw_event_id IS NULL
                  AND e.ts >= $1
                ORDER BY e.ts, e.id
                "#,
                &[&since],
            )
            .await?
            .into_iter()
            .map(RawStatusEvent::from)
            .collect();

        let machine_codes = raw_events.iter().map(|e| e.machine_code.clone()).collect();
        let reason_codes = raw_events.iter().map(|e| e.reason_code.clone()).collect();
        let machines = Self::lookup_ids(
            &tx,
            "SELECT id, code FROM machine WHERE code = ANY($1)",
            machine_codes,
        )
        .await?;
        let reasons = Self::lookup_ids(
            &tx,
            "SELECT id, code FROM reason_code WHERE code = ANY($1)",
            reason_codes,
        )
        .await?;

        let plan = ingest::plan(&raw_events, &machines, &reasons);

        let insert = tx
            .prepare(
                r#"
                INSERT INTO downtime_event
                (raw_event_id, machine_id, workorder, raw_reason_code, start_ts,
                 end_ts, duration_sec, reason_code_id, comment, source_quality)
                VALUES ($1, $2, $3, $4, $5, NULL, NULL, $6, NULL, 'Auto')
                ON CONFLICT (raw_event_id) DO NOTHING
                "#,
            )
            .await?;
        let mut inserted = 0;
        for row in &plan.rows {
            inserted += tx
                .execute(
                    &insert,
                    &[
                        &row.raw_event_id,
                        &row.machine_id,
                        &row.workorder,
                        &row.raw_reason_code,
                        &row.start_ts,
                        &row.reason_code_id,
                    ],
                )
                .await?;
        }
        tx.commit().await?;

        debug!(
            "[STORAGE] ingest: {} candidatos, {} inseridos",
            raw_events.len(),
            inserted
        );
        Ok(IngestReport {
            inserted,
            unresolved: plan.unresolved,
        })
    }

    async fn close_intervals(&self, since: DateTime<Utc>) -> Result<u64, SyncError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let raw_events: Vec<RawStatusEvent> = tx
            .query(
                r#"
                SELECT id, machine_code, workorder, reason_code, ts
                FROM machine_status_event
                WHERE ts >= $1
                "#,
                &[&since],
            )
            .await?
            .into_iter()
            .map(RawStatusEvent::from)
            .collect();

        let closures = closer::plan(&raw_events);
        if closures.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let raw_ids: Vec<i64> = closures.iter().map(|c| c.raw_event_id).collect();
        let end_ts: Vec<DateTime<Utc>> = closures.iter().map(|c| c.end_ts).collect();
        let closed = tx
            .execute(
                r#"
                UPDATE downtime_event AS d
                SET end_ts = v.end_ts
                FROM UNNEST($1::bigint[], $2::timestamptz[]) AS v(raw_event_id, end_ts)
                WHERE d.raw_event_id = v.raw_event_id
                  AND d.end_ts IS NULL
                "#,
                &[&raw_ids, &end_ts],
            )
            .await?;
        tx.commit().await?;
        Ok(closed)
    }

    async fn recompute_durations(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, SyncError> {
        // Um único UPDATE: trunca os segundos e nunca grava valor negativo.
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE downtime_event
                SET duration_sec = GREATEST(
                    0,
                    floor(extract(epoch FROM (COALESCE(end_ts, $2::timestamptz) - start_ts)))
                )::bigint
                WHERE start_ts >= $1
                "#,
                &[&since, &now],
            )
            .await?;
        Ok(updated)
    }

    async fn justify(
        &self,
        event_id: i64,
        reason_code_id: i64,
        comment: &str,
    ) -> Result<Justification, SyncError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                UPDATE downtime_event
                SET reason_code_id = $1,
                    comment = $2,
                    source_quality = 'Manual'
                WHERE id = $3
                RETURNING id, reason_code_id, comment, source_quality
                "#,
                &[&reason_code_id, &comment, &event_id],
            )
            .await?;
        row.map(Justification::from)
            .ok_or(SyncError::NotFound(event_id))
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<DowntimeEventView>, SyncError> {
        let client = self.pool.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client
            .query(
                r#"
                SELECT
                    d.id,
                    d.raw_event_id,
                    m.code AS machine_code,
                    d.workorder,
                    d.raw_reason_code,
                    d.start_ts,
                    d.end_ts,
                    d.duration_sec,
                    rc.code AS reason_code,
                    rc.category,
                    d.comment,
                    d.source_quality
                FROM downtime_event d
                LEFT JOIN machine m ON d.machine_id = m.id
                LEFT JOIN reason_code rc ON d.reason_code_id = rc.id
                ORDER BY d.start_ts DESC, d.id DESC
                LIMIT $1
                "#,
                &[&limit],
            )
            .await?;
        Ok(rows.into_iter().map(DowntimeEventView::from).collect())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, SyncError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT id, code, name, is_active FROM machine ORDER BY id", &[])
            .await?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    async fn list_reason_codes(&self) -> Result<Vec<ReasonCode>, SyncError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, code, description, category FROM reason_code ORDER BY code",
                &[],
            )
            .await?;
        Ok(rows.into_iter().map(ReasonCode::from).collect())
    }
}
