//! Execution Risk Gateway - Last line of defense before a trade fires
//!
//! Four independent gates, all of which must pass: kill switch, market
//! regime, idempotency and per-ticker cooldown. Every gate fails closed on
//! store errors and timeouts: an unauthorized-but-safe trade is an
//! acceptable cost, a duplicate or rogue trade is not. Each rejection
//! carries a machine-distinguishable reason so callers can tell which gate
//! blocked execution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::store::{KvStore, StoreError};
use crate::types::{Horizon, Regime};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Minimum interval between executions on the same ticker, in seconds
    pub cooldown_secs: u64,
    /// Idempotency marker time-to-live, in seconds
    pub idempotency_ttl_secs: u64,
    /// Store key holding the kill-switch flag
    pub kill_switch_key: String,
    /// Store key holding the current market-regime label
    pub regime_key: String,
    /// Bounded timeout for each store operation, in milliseconds
    pub op_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3600,
            idempotency_ttl_secs: 86_400,
            kill_switch_key: "execution:kill_switch".to_string(),
            regime_key: "market:regime".to_string(),
            op_timeout_ms: 2000,
        }
    }
}

/// A candidate trade submitted for authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionProposal {
    /// Ticker symbol
    pub symbol: String,
    /// Signal horizon
    pub horizon: Horizon,
    /// Signal timestamp (Unix milliseconds)
    pub signal_ts: i64,
}

impl ExecutionProposal {
    /// Deterministic execution identifier
    ///
    /// Derived from (ticker, horizon, signal timestamp truncated to whole
    /// seconds) so retries of the same signal map to the same marker.
    pub fn execution_id(&self) -> String {
        format!("{}:{}:{}", self.symbol, self.horizon, self.signal_ts / 1000)
    }
}

/// Why a proposal was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Kill switch not readable as enabled
    KillSwitchDisabled,
    /// Market regime is not the approved state
    RegimeNotApproved {
        /// Label observed in the store, when one was read
        observed: Option<String>,
    },
    /// Idempotency marker already present (or unverifiable)
    DuplicateExecution { execution_id: String },
    /// Ticker still inside its cooldown window (or the window is
    /// unverifiable)
    InCooldown {
        /// Prior execution timestamp, when known
        last_execution_ts: Option<i64>,
    },
}

impl RejectReason {
    /// Stable machine label for logs and records
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::KillSwitchDisabled => "kill_switch_disabled",
            RejectReason::RegimeNotApproved { .. } => "regime_not_approved",
            RejectReason::DuplicateExecution { .. } => "duplicate_execution",
            RejectReason::InCooldown { .. } => "in_cooldown",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Gate decision for one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateDecision {
    Authorized { execution_id: String },
    Rejected { reason: RejectReason },
}

impl GateDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GateDecision::Authorized { .. })
    }
}

/// Execution risk gateway
pub struct ExecutionGateway {
    store: Arc<dyn KvStore>,
    config: GatewayConfig,
}

impl ExecutionGateway {
    pub fn new(store: Arc<dyn KvStore>, config: GatewayConfig) -> Self {
        Self { store, config }
    }

    /// Run a proposal through all four gates
    ///
    /// On authorization the ticker's cooldown timestamp is recorded,
    /// re-arming the cooldown gate.
    pub async fn authorize(&self, proposal: &ExecutionProposal) -> GateDecision {
        if !self.kill_switch_enabled().await {
            warn!(symbol = %proposal.symbol, "execution blocked: kill switch");
            return GateDecision::Rejected {
                reason: RejectReason::KillSwitchDisabled,
            };
        }

        if let Some(reason) = self.check_regime().await {
            warn!(symbol = %proposal.symbol, reason = %reason, "execution blocked: regime");
            return GateDecision::Rejected { reason };
        }

        let execution_id = proposal.execution_id();
        if let Some(reason) = self.claim_idempotency(proposal, &execution_id).await {
            warn!(execution_id = %execution_id, "execution blocked: duplicate");
            return GateDecision::Rejected { reason };
        }

        if let Some(reason) = self.check_cooldown(proposal).await {
            warn!(symbol = %proposal.symbol, "execution blocked: cooldown");
            return GateDecision::Rejected { reason };
        }

        self.record_cooldown(proposal).await;
        info!(
            symbol = %proposal.symbol,
            execution_id = %execution_id,
            "execution authorized"
        );
        GateDecision::Authorized { execution_id }
    }

    /// Gate 1: the kill switch must read as enabled; everything else,
    /// including read errors, means disabled.
    async fn kill_switch_enabled(&self) -> bool {
        match self.get_bounded(&self.config.kill_switch_key).await {
            Ok(Some(value)) => matches!(
                value.to_lowercase().as_str(),
                "true" | "1" | "enabled" | "on"
            ),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "kill switch unreadable, failing closed");
                false
            }
        }
    }

    /// Gate 2: regime label must parse to exactly the approved state.
    async fn check_regime(&self) -> Option<RejectReason> {
        match self.get_bounded(&self.config.regime_key).await {
            Ok(Some(label)) => match Regime::from_label(&label) {
                Some(Regime::Approved) => None,
                _ => Some(RejectReason::RegimeNotApproved {
                    observed: Some(label),
                }),
            },
            Ok(None) => Some(RejectReason::RegimeNotApproved { observed: None }),
            Err(e) => {
                warn!(error = %e, "regime unreadable, failing closed");
                Some(RejectReason::RegimeNotApproved { observed: None })
            }
        }
    }

    /// Gate 3: atomic first-time claim of the execution id. Only a
    /// successful first set authorizes; races admit exactly one winner.
    async fn claim_idempotency(
        &self,
        proposal: &ExecutionProposal,
        execution_id: &str,
    ) -> Option<RejectReason> {
        let key = format!("exec:{}", execution_id);
        let ttl = Duration::from_secs(self.config.idempotency_ttl_secs);
        let claim = timeout(
            self.op_timeout(),
            self.store
                .set_if_absent(&key, &proposal.signal_ts.to_string(), ttl),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout));

        match claim {
            Ok(true) => None,
            Ok(false) => Some(RejectReason::DuplicateExecution {
                execution_id: execution_id.to_string(),
            }),
            Err(e) => {
                // Unverifiable means "already seen": a duplicate trade is a
                // worse failure than a missed one.
                warn!(error = %e, "idempotency marker unverifiable, failing closed");
                Some(RejectReason::DuplicateExecution {
                    execution_id: execution_id.to_string(),
                })
            }
        }
    }

    /// Gate 4: the ticker's last execution must be outside the cooldown
    /// window. No prior trade passes.
    async fn check_cooldown(&self, proposal: &ExecutionProposal) -> Option<RejectReason> {
        let key = Self::cooldown_key(&proposal.symbol);
        match self.get_bounded(&key).await {
            Ok(Some(raw)) => match raw.parse::<i64>() {
                Ok(last_ts) => {
                    let window_ms = self.config.cooldown_secs as i64 * 1000;
                    if proposal.signal_ts - last_ts < window_ms {
                        Some(RejectReason::InCooldown {
                            last_execution_ts: Some(last_ts),
                        })
                    } else {
                        None
                    }
                }
                Err(_) => {
                    warn!(key = %key, value = %raw, "unparseable cooldown entry, failing closed");
                    Some(RejectReason::InCooldown {
                        last_execution_ts: None,
                    })
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cooldown unreadable, failing closed");
                Some(RejectReason::InCooldown {
                    last_execution_ts: None,
                })
            }
        }
    }

    /// Record the authorized trade's timestamp under the cooldown key.
    ///
    /// A write failure does not retract the authorization: the idempotency
    /// marker is already in place, and stranding a consumed marker would
    /// permanently block the signal.
    async fn record_cooldown(&self, proposal: &ExecutionProposal) {
        let key = Self::cooldown_key(&proposal.symbol);
        let ttl = Duration::from_secs(self.config.cooldown_secs);
        let write = timeout(
            self.op_timeout(),
            self.store
                .set(&key, &proposal.signal_ts.to_string(), ttl),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout));

        if let Err(e) = write {
            warn!(key = %key, error = %e, "failed to record cooldown timestamp");
        }
    }

    async fn get_bounded(&self, key: &str) -> Result<Option<String>, StoreError> {
        timeout(self.op_timeout(), self.store.get(key))
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.config.op_timeout_ms)
    }

    fn cooldown_key(symbol: &str) -> String {
        format!("cooldown:{}", symbol)
    }
}
