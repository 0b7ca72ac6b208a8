use crate::error::SyncError;
use config as config_crate;
use serde::Deserialize;
use std::time::Duration;

/// Configuração operacional do motor de sincronização.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// URL de conexão com o banco PostgreSQL.
    pub database_url: String,
    /// Janela retroativa da ingestão, em segundos.
    #[serde(default = "default_ingest_window_secs")]
    pub ingest_window_secs: u64,
    /// Janela retroativa do fechamento de intervalos, em segundos.
    #[serde(default = "default_close_window_secs")]
    pub close_window_secs: u64,
    /// Janela retroativa do recálculo de duração, em segundos.
    #[serde(default = "default_recompute_window_secs")]
    pub recompute_window_secs: u64,
    /// Intervalo entre execuções em segundos.
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,
    /// Prazo máximo de uma execução completa, em segundos.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Limite de linhas da leitura de eventos para relatórios.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
    /// Cria a tabela de paradas (e a restrição de unicidade) na inicialização, se não existir.
    #[serde(default)]
    pub bootstrap_schema: bool,
}

fn default_ingest_window_secs() -> u64 {
    5 * 60
}

fn default_close_window_secs() -> u64 {
    60 * 60
}

fn default_recompute_window_secs() -> u64 {
    60 * 60
}

fn default_run_interval_secs() -> u64 {
    60
}

fn default_run_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    200
}

fn default_pool_max_size() -> usize {
    10
}

impl Config {
    /// Carrega `config.{toml,yaml,json}` (opcional) e sobrepõe variáveis `DOWNTIME_*`.
    pub fn load() -> Result<Self, SyncError> {
        let settings = config_crate::Config::builder()
            .add_source(config_crate::File::with_name("config").required(false))
            .add_source(config_crate::Environment::with_prefix("DOWNTIME").try_parsing(true))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuração com os valores padrão, útil para testes e ferramentas.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ingest_window_secs: default_ingest_window_secs(),
            close_window_secs: default_close_window_secs(),
            recompute_window_secs: default_recompute_window_secs(),
            run_interval_secs: default_run_interval_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            page_size: default_page_size(),
            pool_max_size: default_pool_max_size(),
            bootstrap_schema: false,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: String| Err(SyncError::Configuration(msg));
        if self.database_url.trim().is_empty() {
            return invalid("database_url não pode ser vazio".into());
        }
        for (name, value) in [
            ("ingest_window_secs", self.ingest_window_secs),
            ("close_window_secs", self.close_window_secs),
            ("recompute_window_secs", self.recompute_window_secs),
            ("run_interval_secs", self.run_interval_secs),
            ("run_timeout_secs", self.run_timeout_secs),
        ] {
            if value == 0 {
                return invalid(format!("{name} deve ser maior que zero"));
            }
        }
        if self.page_size == 0 {
            return invalid("page_size deve ser maior que zero".into());
        }
        if self.pool_max_size == 0 {
            return invalid("pool_max_size deve ser maior que zero".into());
        }
        // Um intervalo ingerido precisa continuar visível para o fechamento.
        if self.close_window_secs < self.ingest_window_secs {
            return invalid(format!(
                "close_window_secs ({}) não pode ser menor que ingest_window_secs ({})",
                self.close_window_secs, self.ingest_window_secs
            ));
        }
        if self.run_timeout_secs > self.run_interval_secs {
            return invalid(format!(
                "run_timeout_secs ({}) não pode exceder run_interval_secs ({})",
                self.run_timeout_secs, self.run_interval_secs
            ));
        }
        Ok(())
    }

    pub fn ingest_window(&self) -> Duration {
        Duration::from_secs(self.ingest_window_secs)
    }

    pub fn close_window(&self) -> Duration {
        Duration::from_secs(self.close_window_secs)
    }

    pub fn recompute_window(&self) -> Duration {
        Duration::from_secs(self.recompute_window_secs)
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}
