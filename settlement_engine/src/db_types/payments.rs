use chrono::{DateTime, Utc};
use mkt_common::Cents;
use serde::{Deserialize, Serialize};

use super::{CreditId, Currency, MerchantId, PaymentId};

//--------------------------------------        Payment        ---------------------------------------------------------
/// The record of one captured charge. Payments are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub code: String,
    pub charge_id: String,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    pub merchant_id: MerchantId,
    pub fees: FeeBreakdown,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// e.g. `card`
    pub kind: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub last4: Option<String>,
}

//--------------------------------------        Credit         ---------------------------------------------------------
/// The durable record of a processed refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub id: CreditId,
    pub code: String,
    pub charge_id: String,
    pub refund_id: String,
    /// Refunded amount, net of tax.
    pub amount: Cents,
    pub tax: Cents,
    pub currency: Currency,
    #[serde(default)]
    pub destination: Option<String>,
    pub date: DateTime<Utc>,
}

//--------------------------------------     Fee breakdown     ---------------------------------------------------------
/// How a captured charge splits into merchant subtotal, tax, shipping, platform fees and gateway fees.
/// See [`crate::fees::decompose`] for the rules that produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub charge: ChargeFees,
    pub payout: PayoutFees,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeFees {
    pub subtotal: Cents,
    pub application: ApplicationFees,
    pub stripe: GatewayFees,
    pub shipping: ShippingFees,
    pub tax: Cents,
    pub paid: Cents,
    pub currency: Currency,
}

impl ChargeFees {
    /// The sum of every component. Equal to `paid` for any breakdown produced by `decompose`.
    pub fn components_total(&self) -> Cents {
        self.subtotal + self.tax + self.shipping.estimate + self.application.total + self.stripe.total
    }
}

/// The platform's cut. `tax` is the tax on the merchant fee, pulled out of the merchant breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationFees {
    pub customer: CustomerFees,
    pub merchant: MerchantFees,
    pub tax: Cents,
    pub total: Cents,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFees {
    pub processing: Cents,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantFees {
    pub total: Cents,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFees {
    pub amount: Cents,
    pub tax: Cents,
    pub total: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingFees {
    pub estimate: Cents,
    pub tax: Cents,
    pub fee: Cents,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFees {
    pub customer_paid: Cents,
    pub application_fees: Cents,
    pub stripe_fees: Cents,
    pub summary: PayoutSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub gross: Cents,
    pub deductions: Cents,
    pub net: Cents,
    pub currency: Currency,
}
