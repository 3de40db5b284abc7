//! Fee decomposition.
//!
//! Turns a captured charge and its balance transaction into a [`FeeBreakdown`]. Everything here is integer cents;
//! the subtotal is computed as the residual, so the components of a breakdown always add up to the amount paid.
use log::*;
use mkt_common::Cents;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{
        ApplicationFees,
        ChargeFees,
        Currency,
        CustomerFees,
        FeeBreakdown,
        GatewayFees,
        MerchantFees,
        PayoutFees,
        PayoutSummary,
        ShippingFees,
    },
    gateway_types::{ChargeDetails, FeeDetailKind, ShippingMetadata},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("Charge {0} has no balance transaction")]
    MissingBalanceTransaction(String),
    #[error("The {component} is in {found}, but the charge is in {expected}")]
    CurrencyMismatch { component: &'static str, expected: Currency, found: Currency },
    #[error("Deductions of {deductions} exceed the {paid} paid")]
    NegativeSubtotal { paid: Cents, deductions: Cents },
}

/// The platform's basis-point fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Processing fee charged to the customer, on the line base
    pub customer_bps: u32,
    /// Platform fee charged to the merchant, on the line base
    pub merchant_bps: u32,
    /// Tax levied on the merchant fee
    pub merchant_fee_tax_bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { customer_bps: 300, merchant_bps: 500, merchant_fee_tax_bps: 0 }
    }
}

impl FeeSchedule {
    /// The platform fees owed on `base`, the sum of the settled lines' charge amounts.
    pub fn derive_fees(&self, base: Cents) -> PlatformFees {
        let merchant_total = base.basis_points(self.merchant_bps);
        PlatformFees {
            customer_processing: base.basis_points(self.customer_bps),
            merchant_total,
            merchant_tax: merchant_total.basis_points(self.merchant_fee_tax_bps),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformFees {
    pub customer_processing: Cents,
    pub merchant_total: Cents,
    pub merchant_tax: Cents,
}

#[derive(Debug, Clone)]
pub struct FeeInputs<'a> {
    pub charge: &'a ChargeDetails,
    /// Total order tax, shipping tax included
    pub order_tax: Cents,
    pub shipping: Option<&'a ShippingMetadata>,
    pub platform: PlatformFees,
}

fn check_currency(component: &'static str, expected: &Currency, found: &Currency) -> Result<(), FeeError> {
    if expected == found {
        Ok(())
    } else {
        Err(FeeError::CurrencyMismatch { component, expected: expected.clone(), found: found.clone() })
    }
}

pub fn decompose(inputs: &FeeInputs<'_>) -> Result<FeeBreakdown, FeeError> {
    let charge = inputs.charge;
    let currency = &charge.currency;
    let balance =
        charge.balance_transaction.as_ref().ok_or_else(|| FeeError::MissingBalanceTransaction(charge.id.clone()))?;

    let mut stripe = GatewayFees::default();
    for detail in &balance.fee_details {
        match detail.kind {
            FeeDetailKind::StripeFee => {
                check_currency("gateway fee", currency, &detail.currency)?;
                stripe.amount += detail.amount;
            },
            FeeDetailKind::Tax => {
                check_currency("gateway tax", currency, &detail.currency)?;
                stripe.tax += detail.amount;
            },
            FeeDetailKind::ApplicationFee => {
                trace!("💳️ Ignoring application fee detail of {} on {}", detail.amount, charge.id);
            },
            FeeDetailKind::Other => {
                debug!("💳️ Ignoring unrecognised fee detail of {} on {}", detail.amount, charge.id);
            },
        }
    }
    stripe.total = stripe.amount + stripe.tax;

    let shipping = match inputs.shipping {
        Some(s) => {
            let shipping_currency = s.currency.clone().unwrap_or_else(|| currency.clone());
            check_currency("shipping", currency, &shipping_currency)?;
            ShippingFees { estimate: s.subtotal, tax: s.tax, fee: s.fee, currency: shipping_currency }
        },
        None => ShippingFees { estimate: Cents::ZERO, tax: Cents::ZERO, fee: Cents::ZERO, currency: currency.clone() },
    };

    let platform = inputs.platform;
    let application = ApplicationFees {
        customer: CustomerFees { processing: platform.customer_processing },
        merchant: MerchantFees { total: platform.merchant_total },
        tax: platform.merchant_tax,
        total: platform.merchant_tax + platform.customer_processing + platform.merchant_total,
    };

    let paid = charge.amount;
    let deductions = inputs.order_tax + shipping.estimate + application.total + stripe.total;
    let subtotal = paid - deductions;
    if subtotal.is_negative() {
        return Err(FeeError::NegativeSubtotal { paid, deductions });
    }
    let payout_deductions = application.total + stripe.total;
    let payout = PayoutFees {
        customer_paid: paid,
        application_fees: application.total,
        stripe_fees: stripe.total,
        summary: PayoutSummary {
            gross: paid,
            deductions: payout_deductions,
            net: paid - payout_deductions,
            currency: currency.clone(),
        },
    };
    let charge = ChargeFees {
        subtotal,
        application,
        stripe,
        shipping,
        tax: inputs.order_tax,
        paid,
        currency: currency.clone(),
    };
    Ok(FeeBreakdown { charge, payout })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gateway_types::{BalanceTransaction, FeeDetail};

    fn detail(kind: FeeDetailKind, amount: i64) -> FeeDetail {
        FeeDetail { kind, amount: Cents::from(amount), currency: Currency::default() }
    }

    fn charge(amount: i64, details: Vec<FeeDetail>) -> ChargeDetails {
        let fee = details.iter().map(|d| d.amount).sum::<Cents>();
        ChargeDetails {
            id: "ch_1".into(),
            amount: Cents::from(amount),
            currency: Currency::default(),
            payment_intent_id: Some("pi_1".into()),
            payment_method: None,
            balance_transaction: Some(BalanceTransaction {
                id: "txn_1".into(),
                amount: Cents::from(amount),
                fee,
                net: Cents::from(amount) - fee,
                fee_details: details,
            }),
        }
    }

    #[test]
    fn derive_fees_from_schedule() {
        let schedule = FeeSchedule { customer_bps: 300, merchant_bps: 500, merchant_fee_tax_bps: 1500 };
        let fees = schedule.derive_fees(Cents::from(5000));
        assert_eq!(fees.customer_processing, Cents::from(150));
        assert_eq!(fees.merchant_total, Cents::from(250));
        assert_eq!(fees.merchant_tax, Cents::from(38));
    }

    #[test]
    fn application_fee_detail_is_discarded() {
        let ch = charge(5000, vec![
            detail(FeeDetailKind::StripeFee, 175),
            detail(FeeDetailKind::Tax, 20),
            detail(FeeDetailKind::ApplicationFee, 400),
        ]);
        let platform = FeeSchedule::default().derive_fees(Cents::from(5000));
        let inputs = FeeInputs { charge: &ch, order_tax: Cents::ZERO, shipping: None, platform };
        let fees = decompose(&inputs).unwrap();
        assert_eq!(fees.charge.stripe, GatewayFees {
            amount: Cents::from(175),
            tax: Cents::from(20),
            total: Cents::from(195)
        });
        assert_eq!(fees.charge.application.total, Cents::from(400));
        assert_eq!(fees.charge.subtotal, Cents::from(5000 - 400 - 195));
        assert_eq!(fees.payout.summary.net, Cents::from(5000 - 400 - 195));
        assert_eq!(fees.charge.paid, Cents::from(5000));
    }

    #[test]
    fn components_always_sum_to_paid() {
        let schedule = FeeSchedule { customer_bps: 290, merchant_bps: 733, merchant_fee_tax_bps: 1750 };
        for (amount, stripe_fee, tax, shipping) in
            [(5000, 175, 0, 0), (12_345, 388, 1_011, 999), (101, 33, 7, 0), (99_999, 2_930, 8_000, 1_250)]
        {
            let ch = charge(amount, vec![detail(FeeDetailKind::StripeFee, stripe_fee), detail(FeeDetailKind::Tax, 3)]);
            let ship = ShippingMetadata {
                subtotal: Cents::from(shipping),
                tax: Cents::from(shipping / 10),
                fee: Cents::ZERO,
                currency: None,
            };
            let base = Cents::from(amount) - Cents::from(tax) - Cents::from(shipping);
            let inputs = FeeInputs {
                charge: &ch,
                order_tax: Cents::from(tax),
                shipping: Some(&ship),
                platform: schedule.derive_fees(base),
            };
            let fees = decompose(&inputs).unwrap();
            assert_eq!(fees.charge.components_total(), fees.charge.paid, "amount {amount}");
            assert!(!fees.charge.subtotal.is_negative());
        }
    }

    #[test]
    fn rejects_impossible_breakdowns() {
        let ch = charge(100, vec![detail(FeeDetailKind::StripeFee, 60)]);
        let platform = FeeSchedule::default().derive_fees(Cents::from(1000));
        let inputs = FeeInputs { charge: &ch, order_tax: Cents::ZERO, shipping: None, platform };
        assert_eq!(decompose(&inputs), Err(FeeError::NegativeSubtotal {
            paid: Cents::from(100),
            deductions: Cents::from(140)
        }));

        let ship = ShippingMetadata {
            subtotal: Cents::from(10),
            tax: Cents::ZERO,
            fee: Cents::ZERO,
            currency: Some(Currency::new("EUR")),
        };
        let platform = PlatformFees::default();
        let inputs = FeeInputs { charge: &ch, order_tax: Cents::ZERO, shipping: Some(&ship), platform };
        assert!(matches!(decompose(&inputs), Err(FeeError::CurrencyMismatch { component: "shipping", .. })));

        let mut no_txn = ch.clone();
        no_txn.balance_transaction = None;
        let inputs = FeeInputs { charge: &no_txn, order_tax: Cents::ZERO, shipping: None, platform };
        assert_eq!(decompose(&inputs), Err(FeeError::MissingBalanceTransaction("ch_1".into())));
    }
}
