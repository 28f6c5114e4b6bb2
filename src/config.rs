use std::{net::SocketAddr, time::Duration};

use clap::Parser;

/// Operator settings, read from flags or `SPRING_OPERATOR_*` environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "spring-boot-operator", version, about)]
pub struct OperatorConfig {
    /// Field manager recorded on every write.
    #[arg(
        long,
        env = "SPRING_OPERATOR_FIELD_MANAGER",
        default_value = "spring-boot-operator"
    )]
    pub field_manager: String,

    /// Seconds to wait before retrying after a retryable failure.
    #[arg(long, env = "SPRING_OPERATOR_REQUEUE_SECS", default_value_t = 10)]
    pub requeue_secs: u64,

    /// Serve the defaulting admission webhook on this address.
    #[arg(long, env = "SPRING_OPERATOR_WEBHOOK_ADDR")]
    pub webhook_addr: Option<SocketAddr>,
}

impl OperatorConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}
