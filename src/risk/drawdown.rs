use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Running peak-to-trough tracker with a hysteresis band.
///
/// Escalation starts once drawdown exceeds `warning` and is lifted only
/// after drawdown falls below `recovery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownMonitor {
    peak: Decimal,
    current: Decimal,
    max: Decimal,
    escalated: bool,
    warning: Decimal,
    recovery: Decimal,
}

impl DrawdownMonitor {
    pub fn new(initial_equity: Decimal, warning: Decimal, recovery: Decimal) -> Self {
        Self {
            peak: initial_equity,
            current: Decimal::ZERO,
            max: Decimal::ZERO,
            escalated: false,
            warning,
            recovery: recovery.min(warning),
        }
    }

    /// Feed the latest equity value; returns the current drawdown fraction
    pub fn observe(&mut self, equity: Decimal) -> Decimal {
        if equity > self.peak {
            self.peak = equity;
        }
        self.current = if self.peak > Decimal::ZERO {
            ((self.peak - equity) / self.peak).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        self.max = self.max.max(self.current);

        if !self.escalated && self.current > self.warning {
            self.escalated = true;
            warn!(drawdown = %self.current, "drawdown warning: new exposure blocked");
        } else if self.escalated && self.current < self.recovery {
            self.escalated = false;
            info!(drawdown = %self.current, "drawdown recovered");
        }
        self.current
    }

    pub fn peak(&self) -> Decimal {
        self.peak
    }

    /// Current drawdown as a fraction of the peak
    pub fn current(&self) -> Decimal {
        self.current
    }

    pub fn max(&self) -> Decimal {
        self.max
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }
}
