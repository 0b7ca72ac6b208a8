//! Sincronização de paradas de máquina: reconstrói intervalos de parada
//! (início, fim, duração, motivo) a partir do log append-only de eventos
//! brutos de status.

pub mod closer;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod justify;
pub mod memory;
pub mod recompute;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod window;

pub use crate::config::Config;
pub use crate::engine::{RunReport, SyncEngine};
pub use crate::error::{Stage, SyncError};
pub use crate::justify::JustifyRequest;
pub use crate::memory::MemoryStore;
pub use crate::storage::{DowntimeStore, RunLease, Storage};
