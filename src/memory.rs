// src/memory.rs

// Mesmo contrato de `DowntimeStore`, com relógio controlável, latência
// simulada e falha injetável por etapa. Cada etapa aplica suas escritas
// de forma síncrona sob o lock, então um cancelamento nunca deixa escrita
// parcial.

use crate::closer;
use crate::error::{Stage, SyncError};
use crate::ingest::{self, IngestReport};
use crate::recompute;
use crate::storage::{DowntimeStore, RunLease};
use crate::types::{
    DowntimeEvent, DowntimeEventView, DurationSpan, Justification, Machine, NewDowntimeEvent,
    RawStatusEvent, ReasonCode, SourceQuality,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug)]
struct MemoryState {
    now: DateTime<Utc>,
    machines: Vec<Machine>,
    reason_codes: Vec<ReasonCode>,
    raw_events: Vec<RawStatusEvent>,
    downtime: BTreeMap<i64, DowntimeEvent>,
    /// Índice único de `raw_event_id`, equivalente à restrição do banco.
    by_raw_event: HashMap<i64, i64>,
    next_id: i64,
    latency: Option<Duration>,
    fail_next: Option<Stage>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Inserção com a semântica de `ON CONFLICT (raw_event_id) DO NOTHING`.
    fn insert_unique(&mut self, row: &NewDowntimeEvent) -> bool {
        if self.by_raw_event.contains_key(&row.raw_event_id) {
            return false;
        }
        let id = self.next_id();
        self.by_raw_event.insert(row.raw_event_id, id);
        self.downtime.insert(
            id,
            DowntimeEvent {
                id,
                raw_event_id: row.raw_event_id,
                machine_id: row.machine_id,
                workorder: row.workorder.clone(),
                raw_reason_code: row.raw_reason_code.clone(),
                start_ts: row.start_ts,
                end_ts: None,
                duration_sec: None,
                reason_code_id: row.reason_code_id,
                comment: None,
                source_quality: SourceQuality::Auto,
            },
        );
        true
    }

    fn take_failure(&mut self, stage: Stage) -> Result<(), SyncError> {
        if self.fail_next == Some(stage) {
            self.fail_next = None;
            return Err(SyncError::Store(format!("falha simulada na etapa {stage}")));
        }
        Ok(())
    }
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Equivalente ao advisory lock de execução: compartilhado por todos os
    /// motores que usam este armazenamento.
    run_lock: Arc<Mutex<()>>,
}

/// Solta o lock de execução no drop ou em `release`.
struct MemoryRunLease(Option<OwnedMutexGuard<()>>);

#[async_trait]
impl RunLease for MemoryRunLease {
    async fn release(&mut self) -> Result<(), SyncError> {
        self.0 = None;
        Ok(())
    }
}

impl MemoryStore {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                now,
                machines: Vec::new(),
                reason_codes: Vec::new(),
                raw_events: Vec::new(),
                downtime: BTreeMap::new(),
                by_raw_event: HashMap::new(),
                next_id: 0,
                latency: None,
                fail_next: None,
            }),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn set_now(&self, now: DateTime<Utc>) {
        self.state.lock().await.now = now;
    }

    pub async fn advance(&self, by: TimeDelta) {
        let mut state = self.state.lock().await;
        state.now += by;
    }

    /// Atraso aplicado antes de cada etapa automática efetivar suas escritas.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// A próxima chamada da etapa indicada falha com `SyncError::Store`.
    pub async fn fail_next(&self, stage: Stage) {
        self.state.lock().await.fail_next = Some(stage);
    }

    pub async fn add_machine(&self, code: &str, name: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.machines.push(Machine {
            id,
            code: code.to_string(),
            name: name.to_string(),
            is_active: true,
        });
        id
    }

    pub async fn add_reason_code(&self, code: &str, category: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.reason_codes.push(ReasonCode {
            id,
            code: code.to_string(),
            description: None,
            category: Some(category.to_string()),
        });
        id
    }

    /// Acrescenta um evento bruto (append-only) e devolve seu id.
    pub async fn push_raw_event(
        &self,
        machine_code: &str,
        reason_code: &str,
        ts: DateTime<Utc>,
    ) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.raw_events.push(RawStatusEvent {
            id,
            machine_code: machine_code.to_string(),
            workorder: None,
            reason_code: reason_code.to_string(),
            ts,
        });
        id
    }

    pub async fn downtime_events(&self) -> Vec<DowntimeEvent> {
        self.state.lock().await.downtime.values().cloned().collect()
    }

    pub async fn downtime_for_raw_event(&self, raw_event_id: i64) -> Option<DowntimeEvent> {
        let state = self.state.lock().await;
        let id = state.by_raw_event.get(&raw_event_id)?;
        state.downtime.get(id).cloned()
    }

    /// Insere diretamente pelo caminho único, ignorando duplicatas.
    pub async fn insert_downtime(&self, row: &NewDowntimeEvent) -> bool {
        self.state.lock().await.insert_unique(row)
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DowntimeStore for MemoryStore {
    async fn acquire_run(&self) -> Result<Option<Box<dyn RunLease>>, SyncError> {
        Ok(Arc::clone(&self.run_lock)
            .try_lock_owned()
            .ok()
            .map(|guard| Box::new(MemoryRunLease(Some(guard))) as Box<dyn RunLease>))
    }

    async fn now(&self) -> Result<DateTime<Utc>, SyncError> {
        Ok(self.state.lock().await.now)
    }

    async fn ingest(&self, since: DateTime<Utc>) -> Result<IngestReport, SyncError> {
        // Leitura e escrita em momentos distintos: duas ingestões concorrentes
        // podem planejar o mesmo evento, e só o índice único as separa.
        let plan = {
            let state = self.state.lock().await;
            let candidates: Vec<RawStatusEvent> = state
                .raw_events
                .iter()
                .filter(|e| e.ts >= since && !state.by_raw_event.contains_key(&e.id))
                .cloned()
                .collect();
            let machines: HashMap<String, i64> = state
                .machines
                .iter()
                .map(|m| (m.code.clone(), m.id))
                .collect();
            let reasons: HashMap<String, i64> = state
                .reason_codes
                .iter()
                .map(|r| (r.code.clone(), r.id))
                .collect();
            ingest::plan(&candidates, &machines, &reasons)
        };

        tokio::task::yield_now().await;
        self.simulate_latency().await;

        let mut state = self.state.lock().await;
        state.take_failure(Stage::Ingest)?;
        let inserted = plan
            .rows
            .iter()
            .filter(|row| state.insert_unique(row))
            .count() as u64;
        Ok(IngestReport {
            inserted,
            unresolved: plan.unresolved,
        })
    }

    async fn close_intervals(&self, since: DateTime<Utc>) -> Result<u64, SyncError> {
        self.simulate_latency().await;

        let mut state = self.state.lock().await;
        state.take_failure(Stage::Close)?;
        let window: Vec<RawStatusEvent> = state
            .raw_events
            .iter()
            .filter(|e| e.ts >= since)
            .cloned()
            .collect();

        let mut closed = 0;
        for closure in closer::plan(&window) {
            let Some(&id) = state.by_raw_event.get(&closure.raw_event_id) else {
                continue;
            };
            if let Some(row) = state.downtime.get_mut(&id) {
                if row.is_open() {
                    row.end_ts = Some(closure.end_ts);
                    closed += 1;
                }
            }
        }
        Ok(closed)
    }

    async fn recompute_durations(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, SyncError> {
        self.simulate_latency().await;

        let mut state = self.state.lock().await;
        state.take_failure(Stage::Recompute)?;
        let spans: Vec<DurationSpan> = state
            .downtime
            .values()
            .filter(|d| d.start_ts >= since)
            .map(|d| DurationSpan {
                id: d.id,
                start_ts: d.start_ts,
                end_ts: d.end_ts,
            })
            .collect();

        let mut updated = 0;
        for (id, seconds) in recompute::plan(&spans, now) {
            if let Some(row) = state.downtime.get_mut(&id) {
                row.duration_sec = Some(seconds);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn justify(
        &self,
        event_id: i64,
        reason_code_id: i64,
        comment: &str,
    ) -> Result<Justification, SyncError> {
        let mut state = self.state.lock().await;
        let row = state
            .downtime
            .get_mut(&event_id)
            .ok_or(SyncError::NotFound(event_id))?;
        row.reason_code_id = Some(reason_code_id);
        row.comment = Some(comment.to_string());
        row.source_quality = SourceQuality::Manual;
        Ok(Justification {
            id: row.id,
            reason_code_id: row.reason_code_id,
            comment: row.comment.clone(),
            source_quality: row.source_quality,
        })
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<DowntimeEventView>, SyncError> {
        let state = self.state.lock().await;
        let mut rows: Vec<&DowntimeEvent> = state.downtime.values().collect();
        rows.sort_by(|a, b| b.start_ts.cmp(&a.start_ts).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|d| {
                let machine = state.machines.iter().find(|m| m.id == d.machine_id);
                let reason = d
                    .reason_code_id
                    .and_then(|id| state.reason_codes.iter().find(|r| r.id == id));
                DowntimeEventView {
                    id: d.id,
                    raw_event_id: d.raw_event_id,
                    machine_code: machine.map(|m| m.code.clone()),
                    workorder: d.workorder.clone(),
                    raw_reason_code: d.raw_reason_code.clone(),
                    start_ts: d.start_ts,
                    end_ts: d.end_ts,
                    duration_sec: d.duration_sec,
                    reason_code: reason.map(|r| r.code.clone()),
                    category: reason.and_then(|r| r.category.clone()),
                    comment: d.comment.clone(),
                    source_quality: d.source_quality,
                }
            })
            .collect())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, SyncError> {
        let mut machines = self.state.lock().await.machines.clone();
        machines.sort_by_key(|m| m.id);
        Ok(machines)
    }

    async fn list_reason_codes(&self) -> Result<Vec<ReasonCode>, SyncError> {
        let mut codes = self.state.lock().await.reason_codes.clone();
        codes.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(codes)
    }
}
