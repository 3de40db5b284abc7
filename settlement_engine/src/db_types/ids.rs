use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// The id of an Order document. Orders are their own partition.
    OrderId
);
string_id!(
    /// Identifies a line within its order. Stable for the life of the order, and used for keyed patch paths.
    LineId
);
string_id!(MerchantId);
string_id!(
    /// A product variant, or a ticket type of a tour listing.
    VariantId
);
string_id!(PaymentId);
string_id!(CreditId);

impl PaymentId {
    /// Payments are keyed by the charge they record, so that a replayed capture finds the existing payment.
    pub fn for_charge(charge_id: &str) -> Self {
        Self(format!("pay_{charge_id}"))
    }
}

impl CreditId {
    /// Credits are keyed by the gateway refund they record.
    pub fn for_refund(refund_id: &str) -> Self {
        Self(format!("cr_{refund_id}"))
    }
}
