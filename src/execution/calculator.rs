//! Read-only investment projections

use super::InvestmentCalculator;
use crate::error::AssistantError;
use crate::models::{format_inr, InvestmentKind};
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InvestmentProjection {
    pub invested: f64,
    pub future_value: f64,
}

impl InvestmentProjection {
    pub fn gain(&self) -> f64 {
        self.future_value - self.invested
    }

    pub fn describe(&self, kind: InvestmentKind, amount: f64, annual_rate: f64, years: u32) -> String {
        let contribution = match kind {
            InvestmentKind::Sip => format!("SIP of {}/month", format_inr(amount)),
            InvestmentKind::Lumpsum => format!("Lump sum of {}", format_inr(amount)),
        };
        format!(
            "{} for {} years at {}%: invested {}, projected value {} (gain {})",
            contribution,
            years,
            annual_rate,
            format_inr(self.invested.round()),
            format_inr(self.future_value.round()),
            format_inr(self.gain().round()),
        )
    }
}

/// Monthly compounding for SIPs (contribution at the start of each month),
/// annual compounding for lump sums.
pub struct CompoundingCalculator;

impl InvestmentCalculator for CompoundingCalculator {
    fn project(
        &self,
        kind: InvestmentKind,
        amount: f64,
        annual_rate: f64,
        years: u32,
    ) -> Result<InvestmentProjection> {
        let projection = match kind {
            InvestmentKind::Sip => {
                let months = years as i32 * 12;
                let i = annual_rate / 12.0 / 100.0;
                let future_value = if i == 0.0 {
                    amount * months as f64
                } else {
                    amount * (((1.0 + i).powi(months) - 1.0) / i) * (1.0 + i)
                };
                InvestmentProjection {
                    invested: amount * months as f64,
                    future_value,
                }
            }
            InvestmentKind::Lumpsum => InvestmentProjection {
                invested: amount,
                future_value: amount * (1.0 + annual_rate / 100.0).powi(years as i32),
            },
        };

        if !projection.invested.is_finite() || !projection.future_value.is_finite() {
            return Err(AssistantError::Execution(
                "the projected amount is too large to calculate".to_string(),
            ));
        }

        Ok(projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lumpsum_compounds_annually() {
        let p = CompoundingCalculator
            .project(InvestmentKind::Lumpsum, 100000.0, 10.0, 2)
            .unwrap();
        assert_eq!(p.invested, 100000.0);
        assert!((p.future_value - 121000.0).abs() < 1e-6);
    }

    #[test]
    fn test_sip_ten_years_at_twelve_percent() {
        let p = CompoundingCalculator
            .project(InvestmentKind::Sip, 5000.0, 12.0, 10)
            .unwrap();
        assert_eq!(p.invested, 600000.0);
        // Standard annuity-due figure for ₹5000/month, 1% per month, 120 months
        assert!((p.future_value - 1_161_695.0).abs() < 1.0);
        assert!(p
            .describe(InvestmentKind::Sip, 5000.0, 12.0, 10)
            .starts_with("SIP of ₹5000/month for 10 years at 12%"));
    }

    #[test]
    fn test_overflowing_projection_is_execution_error() {
        let err = CompoundingCalculator
            .project(InvestmentKind::Lumpsum, 1e305, 50.0, 40)
            .unwrap_err();
        assert!(matches!(err, AssistantError::Execution(ref r) if r.contains("too large")));

        let err = CompoundingCalculator
            .project(InvestmentKind::Sip, f64::MAX, 12.0, 30)
            .unwrap_err();
        assert!(matches!(err, AssistantError::Execution(_)));
    }
}
