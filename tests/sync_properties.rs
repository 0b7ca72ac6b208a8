use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use downtime_sync::types::SourceQuality;
use downtime_sync::{Config, DowntimeStore, JustifyRequest, MemoryStore, SyncEngine, SyncError};
use std::sync::Arc;
use std::time::Duration;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
}

fn engine(store: &Arc<MemoryStore>) -> SyncEngine<MemoryStore> {
    SyncEngine::new(Arc::clone(store), &Config::with_database_url("memory://"))
}

// Rodar a ingestão duas vezes sem eventos novos não cria paradas extras.
#[tokio::test]
async fn ingest_is_idempotent() {
    let store = Arc::new(MemoryStore::new(at(10, 3)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    store.push_raw_event("PRESS-01", "OFF", at(10, 0)).await;
    store.push_raw_event("PRESS-01", "RUNNING", at(10, 2)).await;
    let engine = engine(&store);

    let first = engine.run_once().await.unwrap();
    let second = engine.run_once().await.unwrap();

    assert_eq!(first.ingest.inserted, 2);
    assert_eq!(second.ingest.inserted, 0);
    assert_eq!(store.downtime_events().await.len(), 2);
}

// Ingestões concorrentes sobre a mesma janela geram no máximo uma parada por evento bruto.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_creates_at_most_one_interval_per_raw_event() {
    let store = Arc::new(MemoryStore::new(at(10, 4)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    let mut raw_ids = Vec::new();
    for minute in 0..4 {
        raw_ids.push(store.push_raw_event("PRESS-01", "OFF", at(10, minute)).await);
    }

    let since = at(9, 59);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.ingest(since).await.unwrap().inserted })
        })
        .collect();
    let mut inserted = 0;
    for handle in handles {
        inserted += handle.await.unwrap();
    }

    assert_eq!(inserted, 4);
    let rows = store.downtime_events().await;
    assert_eq!(rows.len(), 4);
    for raw_id in raw_ids {
        assert_eq!(rows.iter().filter(|r| r.raw_event_id == raw_id).count(), 1);
    }
}

// Duração de um intervalo aberto nunca diminui entre execuções.
#[tokio::test]
async fn open_duration_is_monotonic() {
    let store = Arc::new(MemoryStore::new(at(10, 1)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    let raw_id = store.push_raw_event("PRESS-01", "OFF", at(10, 0)).await;
    let engine = engine(&store);

    let mut last = -1;
    for _ in 0..5 {
        engine.run_once().await.unwrap();
        let row = store.downtime_for_raw_event(raw_id).await.unwrap();
        assert!(row.end_ts.is_none());
        let duration = row.duration_sec.unwrap();
        assert!(duration >= last, "{duration} < {last}");
        last = duration;
        store.advance(TimeDelta::seconds(45)).await;
    }
    assert_eq!(last, 60 + 4 * 45);
}

// Dois motores sobre o mesmo armazenamento (daemon e cron) nunca intercalam
// etapas: uma execução atrasada não sobrescreve a duração de uma mais nova.
#[tokio::test(start_paused = true)]
async fn runs_from_separate_engines_never_interleave() {
    let store = Arc::new(MemoryStore::new(at(10, 1)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    let raw_id = store.push_raw_event("PRESS-01", "OFF", at(10, 0)).await;
    store.set_latency(Some(Duration::from_secs(5))).await;
    let daemon = Arc::new(engine(&store));
    let cron = engine(&store);

    let stalled = tokio::spawn({
        let daemon = Arc::clone(&daemon);
        async move { daemon.run_once().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    store.set_now(at(10, 5)).await;
    store.set_latency(None).await;
    assert!(matches!(cron.run_once().await, Err(SyncError::RunInProgress)));

    let first = stalled.await.unwrap().unwrap();
    assert_eq!(first.now, at(10, 1));
    let after_first = store.downtime_for_raw_event(raw_id).await.unwrap().duration_sec;
    assert_eq!(after_first, Some(60));

    let second = cron.run_once().await.unwrap();
    assert_eq!(second.now, at(10, 5));
    let after_second = store.downtime_for_raw_event(raw_id).await.unwrap().duration_sec;
    assert_eq!(after_second, Some(300));
    assert!(after_second >= after_first);
}

// 10:00 OFF, 10:15 RUNNING, 11:00 OFF: cada intervalo fecha no evento seguinte.
#[tokio::test]
async fn closing_uses_the_true_next_event() {
    let store = Arc::new(MemoryStore::new(at(10, 1)));
    store.add_machine("M", "Máquina M").await;
    store.add_machine("OTHER", "Outra").await;
    let engine = engine(&store);

    let off = store.push_raw_event("M", "OFF", at(10, 0)).await;
    engine.run_once().await.unwrap();

    store.set_now(at(10, 16)).await;
    let running = store.push_raw_event("M", "RUNNING", at(10, 15)).await;
    // evento de outra máquina entre os dois não interfere
    store.push_raw_event("OTHER", "OFF", at(10, 30)).await;
    engine.run_once().await.unwrap();

    store.set_now(at(11, 2)).await;
    let late = store.push_raw_event("M", "OFF", at(11, 0)).await;
    engine.run_once().await.unwrap();

    let off_row = store.downtime_for_raw_event(off).await.unwrap();
    let running_row = store.downtime_for_raw_event(running).await.unwrap();
    let late_row = store.downtime_for_raw_event(late).await.unwrap();

    assert_eq!(off_row.end_ts, Some(at(10, 15)));
    assert_eq!(off_row.duration_sec, Some(15 * 60));
    assert_eq!(running_row.end_ts, Some(at(11, 0)));
    assert_eq!(running_row.duration_sec, Some(45 * 60));
    assert_eq!(late_row.end_ts, None);
    assert_eq!(late_row.duration_sec, Some(120));
}

// Uma parada já fechada não é movida por reexecuções.
#[tokio::test]
async fn closed_interval_is_never_moved() {
    let store = Arc::new(MemoryStore::new(at(10, 3)));
    store.add_machine("M", "Máquina M").await;
    let first = store.push_raw_event("M", "OFF", at(10, 0)).await;
    store.push_raw_event("M", "RUNNING", at(10, 2)).await;
    let engine = engine(&store);
    engine.run_once().await.unwrap();

    // evento atrasado entre os dois chega depois do fechamento
    store.push_raw_event("M", "JAM", at(10, 1)).await;
    engine.run_once().await.unwrap();

    let row = store.downtime_for_raw_event(first).await.unwrap();
    assert_eq!(row.end_ts, Some(at(10, 2)));
}

// Justificativa manual sobrevive às etapas automáticas; a duração continua sendo atualizada.
#[tokio::test]
async fn manual_justification_is_sticky() {
    let store = Arc::new(MemoryStore::new(at(10, 1)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    let off_reason = store.add_reason_code("OFF", "Parada planejada").await;
    let setup_reason = store.add_reason_code("SETUP", "Preparação").await;
    let raw_id = store.push_raw_event("PRESS-01", "OFF", at(10, 0)).await;
    let engine = engine(&store);
    engine.run_once().await.unwrap();

    let row = store.downtime_for_raw_event(raw_id).await.unwrap();
    assert_eq!(row.reason_code_id, Some(off_reason));
    assert_eq!(row.source_quality, SourceQuality::Auto);

    let confirmed = engine
        .justify(&JustifyRequest {
            event_id: row.id,
            reason_code_id: setup_reason,
            comment: Some("troca de molde".into()),
        })
        .await
        .unwrap();
    assert_eq!(confirmed.source_quality, SourceQuality::Manual);

    store.advance(TimeDelta::minutes(2)).await;
    store.push_raw_event("PRESS-01", "RUNNING", at(10, 2)).await;
    engine.run_once().await.unwrap();
    store.advance(TimeDelta::minutes(1)).await;
    engine.run_once().await.unwrap();

    let after = store.downtime_for_raw_event(raw_id).await.unwrap();
    assert_eq!(after.reason_code_id, Some(setup_reason));
    assert_eq!(after.comment.as_deref(), Some("troca de molde"));
    assert_eq!(after.source_quality, SourceQuality::Manual);
    assert_eq!(after.end_ts, Some(at(10, 2)));
    assert_eq!(after.duration_sec, Some(120));
}

// Justificativa concorrente com execuções agendadas não perde nenhuma das escritas.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn justify_races_scheduled_runs_without_lost_updates() {
    let store = Arc::new(MemoryStore::new(at(10, 1)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    let raw_id = store.push_raw_event("PRESS-01", "OFF", at(10, 0)).await;
    let engine = Arc::new(engine(&store));
    engine.run_once().await.unwrap();
    let event_id = store.downtime_for_raw_event(raw_id).await.unwrap().id;
    store.push_raw_event("PRESS-01", "RUNNING", at(10, 1)).await;

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for _ in 0..20 {
                let _ = engine.run_once().await;
            }
        })
    };
    let justifier = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .justify(&JustifyRequest {
                    event_id,
                    reason_code_id: 77,
                    comment: None,
                })
                .await
                .unwrap()
        })
    };
    runner.await.unwrap();
    justifier.await.unwrap();

    let row = store.downtime_for_raw_event(raw_id).await.unwrap();
    assert_eq!(row.source_quality, SourceQuality::Manual);
    assert_eq!(row.reason_code_id, Some(77));
    assert_eq!(row.comment.as_deref(), Some(""));
    assert_eq!(row.end_ts, Some(at(10, 1)));
    assert_eq!(row.duration_sec, Some(60));
}

// Máquina desconhecida é ignorada sem impedir os demais eventos do lote.
#[tokio::test]
async fn unresolvable_machine_is_skipped_not_fatal() {
    let store = Arc::new(MemoryStore::new(at(10, 3)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    let ghost = store.push_raw_event("GHOST-99", "OFF", at(10, 0)).await;
    let good = store.push_raw_event("PRESS-01", "E-STOP", at(10, 1)).await;

    let report = engine(&store).run_once().await.unwrap();

    assert_eq!(report.ingest.inserted, 1);
    assert_eq!(report.ingest.skipped_machines(), 1);
    assert!(store.downtime_for_raw_event(ghost).await.is_none());
    let row = store.downtime_for_raw_event(good).await.unwrap();
    assert_eq!(row.reason_code_id, None);
    assert_eq!(row.raw_reason_code, "E-STOP");
}

// Fronteira da janela de recálculo: exatamente em now - W entra; um microssegundo antes, não.
#[tokio::test]
async fn recompute_window_boundary_is_inclusive() {
    let now = at(12, 0);
    let store = Arc::new(MemoryStore::new(now));
    store.add_machine("M", "Máquina M").await;
    store.add_machine("N", "Máquina N").await;
    let boundary = now - TimeDelta::hours(1);
    let on_edge = store.push_raw_event("M", "OFF", boundary).await;
    let too_old = store
        .push_raw_event("N", "OFF", boundary - TimeDelta::microseconds(1))
        .await;
    let engine = engine(&store);

    // ingere os dois com o relógio recuado, depois volta ao presente
    store.set_now(boundary + TimeDelta::minutes(1)).await;
    engine.run_once().await.unwrap();
    assert_eq!(store.downtime_for_raw_event(on_edge).await.unwrap().duration_sec, Some(60));
    assert_eq!(store.downtime_for_raw_event(too_old).await.unwrap().duration_sec, Some(60));

    store.set_now(now).await;
    let report = engine.run_once().await.unwrap();

    assert_eq!(report.recomputed, 1);
    let edge_row = store.downtime_for_raw_event(on_edge).await.unwrap();
    let old_row = store.downtime_for_raw_event(too_old).await.unwrap();
    assert_eq!(edge_row.duration_sec, Some(3600));
    // fora da janela: congelada no último valor calculado, ainda aberta
    assert_eq!(old_row.end_ts, None);
    assert_eq!(old_row.duration_sec, Some(60));
}

// Fronteira da janela de ingestão: exatamente em now - W entra; um microssegundo antes, não.
#[tokio::test]
async fn ingest_window_boundary_is_inclusive() {
    let now = at(12, 0);
    let store = Arc::new(MemoryStore::new(now));
    store.add_machine("M", "Máquina M").await;
    store.add_machine("N", "Máquina N").await;
    let boundary = now - TimeDelta::minutes(5);
    let on_edge = store.push_raw_event("M", "OFF", boundary).await;
    let too_old = store
        .push_raw_event("N", "OFF", boundary - TimeDelta::microseconds(1))
        .await;

    let report = engine(&store).run_once().await.unwrap();

    assert_eq!(report.ingest.inserted, 1);
    assert!(store.downtime_for_raw_event(on_edge).await.is_some());
    assert!(store.downtime_for_raw_event(too_old).await.is_none());
}

// Fronteira da janela de fechamento: o evento em now - W ainda é fechado; um microssegundo antes, não.
#[tokio::test]
async fn close_window_boundary_is_inclusive() {
    let now = at(12, 0);
    let store = Arc::new(MemoryStore::new(now));
    store.add_machine("M", "Máquina M").await;
    store.add_machine("N", "Máquina N").await;
    let boundary = now - TimeDelta::hours(1);
    let on_edge = store.push_raw_event("M", "OFF", boundary).await;
    let too_old = store
        .push_raw_event("N", "OFF", boundary - TimeDelta::microseconds(1))
        .await;
    let engine = engine(&store);

    // ingere os dois abertos com o relógio recuado
    store.set_now(boundary + TimeDelta::minutes(1)).await;
    engine.run_once().await.unwrap();

    store.set_now(now).await;
    store.push_raw_event("M", "RUNNING", at(11, 59)).await;
    store.push_raw_event("N", "RUNNING", at(11, 59)).await;
    let report = engine.run_once().await.unwrap();

    assert_eq!(report.closed, 1);
    let edge_row = store.downtime_for_raw_event(on_edge).await.unwrap();
    let old_row = store.downtime_for_raw_event(too_old).await.unwrap();
    assert_eq!(edge_row.end_ts, Some(at(11, 59)));
    assert_eq!(old_row.end_ts, None);
}

// Eventos antigos fora da janela de ingestão não são reprocessados.
#[tokio::test]
async fn ingest_only_looks_back_its_window() {
    let store = Arc::new(MemoryStore::new(at(10, 30)));
    store.add_machine("M", "Máquina M").await;
    let old = store.push_raw_event("M", "OFF", at(10, 0)).await;
    let fresh = store.push_raw_event("M", "RUNNING", at(10, 27)).await;

    let report = engine(&store).run_once().await.unwrap();

    assert_eq!(report.ingest.inserted, 1);
    assert!(store.downtime_for_raw_event(old).await.is_none());
    assert!(store.downtime_for_raw_event(fresh).await.is_some());
}

// Leitura para relatórios traz máquina e categoria resolvidas, mais recentes primeiro.
#[tokio::test]
async fn recent_events_resolve_machine_and_category() {
    let store = Arc::new(MemoryStore::new(at(10, 4)));
    store.add_machine("PRESS-01", "Prensa 1").await;
    store.add_reason_code("OFF", "Parada planejada").await;
    store.push_raw_event("PRESS-01", "OFF", at(10, 0)).await;
    store.push_raw_event("PRESS-01", "RUNNING", at(10, 2)).await;
    let engine = engine(&store);
    engine.run_once().await.unwrap();

    let rows = engine.recent_events(None).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].raw_reason_code, "RUNNING");
    assert_eq!(rows[1].machine_code.as_deref(), Some("PRESS-01"));
    assert_eq!(rows[1].reason_code.as_deref(), Some("OFF"));
    assert_eq!(rows[1].category.as_deref(), Some("Parada planejada"));
    assert_eq!(rows[1].end_ts, Some(at(10, 2)));
}
