// src/closer.rs

// O fim real de um intervalo só é conhecido quando a próxima mudança de
// status acontece. Por isso o fechamento é refeito a cada execução sobre a
// janela de fechamento até o sucessor aparecer. A aplicação é condicional
// (`end_ts` ainda nulo): um intervalo já fechado nunca é movido.

use crate::types::{Closure, RawStatusEvent};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Para cada evento bruto, o timestamp do evento seguinte da mesma máquina
/// (o menor timestamp estritamente maior). Eventos sem sucessor ficam de fora
/// e seus intervalos continuam abertos.
///
/// Eventos com o mesmo timestamp compartilham o mesmo sucessor. O resultado é
/// ordenado por máquina e depois por timestamp.
pub fn plan(raw_events: &[RawStatusEvent]) -> Vec<Closure> {
    let mut by_machine: BTreeMap<&str, Vec<&RawStatusEvent>> = BTreeMap::new();
    for event in raw_events {
        by_machine
            .entry(event.machine_code.as_str())
            .or_default()
            .push(event);
    }

    let mut closures = Vec::new();
    for (_, mut timeline) in by_machine {
        timeline.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.id.cmp(&b.id)));

        let mut successors: Vec<Option<DateTime<Utc>>> = vec![None; timeline.len()];
        for i in (0..timeline.len().saturating_sub(1)).rev() {
            let next = timeline[i + 1];
            successors[i] = if next.ts > timeline[i].ts {
                Some(next.ts)
            } else {
                successors[i + 1]
            };
        }

        closures.extend(
            timeline
                .iter()
                .zip(successors)
                .filter_map(|(event, next)| {
                    next.map(|end_ts| Closure {
                        raw_event_id: event.id,
                        end_ts,
                    })
                }),
        );
    }
    closures
}
