use lodestone_common::error::{LodestoneError, LodestoneResult};
use lodestone_config::{get_var_or, AppConfig};

#[derive(Debug, Clone)]
pub struct Settings {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub database_url: String,
    pub amqp_url: String,
    pub health_addr: String,
}

impl Settings {
    pub fn from_env() -> LodestoneResult<Self> {
        let app = AppConfig::from_env()?;
        let health_addr = app.bind_addr();

        Ok(Self {
            enabled: get_var_or("ORCHESTRATOR_ENABLED", "true")
                .parse()
                .map_err(|e| LodestoneError::Config(format!("invalid ORCHESTRATOR_ENABLED: {e}")))?,
            check_interval_secs: get_var_or("SYNC_CHECK_INTERVAL_SECS", "60")
                .parse()
                .map_err(|e| {
                    LodestoneError::Config(format!("invalid SYNC_CHECK_INTERVAL_SECS: {e}"))
                })?,
            retry_interval_secs: get_var_or("CONNECTION_RETRY_INTERVAL_SECS", "10")
                .parse()
                .map_err(|e| {
                    LodestoneError::Config(format!("invalid CONNECTION_RETRY_INTERVAL_SECS: {e}"))
                })?,
            database_url: app.database_url,
            amqp_url: app.amqp_url,
            health_addr,
        })
    }
}
