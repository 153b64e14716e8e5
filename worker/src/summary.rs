use crate::payment::PaymentRecord;
use crate::processor_type::ProcessorType;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSummary {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "totalAmount")]
    pub total_amount: Decimal,
}

impl ProcessorSummary {
    /// Builds a summary from the raw counters kept by the ledger.
    pub fn from_counters(total_requests: u64, total_cents: i64) -> Self {
        Self {
            total_requests,
            total_amount: Decimal::new(total_cents, 2),
        }
    }

    fn add(&mut self, amount: Decimal) {
        self.total_requests += 1;
        self.total_amount += amount;
    }

    fn rounded(self) -> Self {
        Self {
            total_requests: self.total_requests,
            total_amount: round_amount(self.total_amount),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentsSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}

impl PaymentsSummary {
    fn get_mut(&mut self, processor: ProcessorType) -> &mut ProcessorSummary {
        match processor {
            ProcessorType::Default => &mut self.default,
            ProcessorType::Fallback => &mut self.fallback,
        }
    }

    /// Sums records per processor; amounts are rounded once, at the end.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a PaymentRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.get_mut(record.processor).add(record.amount);
        }
        summary.rounded()
    }

    pub fn rounded(self) -> Self {
        Self {
            default: self.default.rounded(),
            fallback: self.fallback.rounded(),
        }
    }
}

/// Rounds a monetary amount to cents, half away from zero.
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Integer cents of an amount already rounded with [`round_amount`].
pub fn to_cents(amount: Decimal) -> i64 {
    let rounded = round_amount(amount);
    let cents = rounded.mantissa() * 10_i128.pow(2u32.saturating_sub(rounded.scale()));
    i64::try_from(cents).unwrap_or(i64::MAX)
}
