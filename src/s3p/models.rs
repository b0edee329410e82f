//! Wire types of the S3P v2 API.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AmountType {
    Fixed,
    #[default]
    #[serde(other)]
    Custom,
}

/// Entry returned by the payment-items endpoints (`/cashin`, `/product`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentItem {
    pub pay_item_id: String,
    #[serde(default, rename = "serviceid")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub amount_type: AmountType,
    #[serde(default)]
    pub local_cur: Option<String>,
    #[serde(default)]
    pub amount_local_cur: Option<BigDecimal>,
    #[serde(default)]
    pub min_amount: Option<BigDecimal>,
    #[serde(default)]
    pub max_amount: Option<BigDecimal>,
}

impl PaymentItem {
    /// Range check for variable-amount items.
    pub fn accepts(&self, amount: &BigDecimal) -> bool {
        if amount <= &BigDecimal::from(0) {
            return false;
        }
        let above_min = self.min_amount.as_ref().map_or(true, |min| amount >= min);
        let below_max = self.max_amount.as_ref().map_or(true, |max| amount <= max);
        above_min && below_max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub quote_id: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub pay_item_id: Option<String>,
    #[serde(default)]
    pub amount_local_cur: Option<BigDecimal>,
    #[serde(default)]
    pub price_local_cur: Option<BigDecimal>,
}

/// Body of `POST /collectstd`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    pub quote_id: String,
    pub customer_phonenumber: String,
    pub customer_emailaddress: String,
    pub customer_name: String,
    pub customer_address: String,
    pub service_number: String,
    pub trid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Payment object returned by both `collectstd` and `verifytx`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
    #[serde(default)]
    pub ptn: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub trid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub veri_code: Option<String>,
    #[serde(default)]
    pub price_local_cur: Option<BigDecimal>,
    #[serde(default)]
    pub pay_item_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

/// Error body S3P attaches to non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub resp_code: Option<i64>,
    #[serde(default)]
    pub dev_msg: Option<String>,
    #[serde(default)]
    pub usr_msg: Option<String>,
}

impl ProviderErrorBody {
    pub fn message(&self) -> Option<String> {
        self.dev_msg.clone().or_else(|| self.usr_msg.clone())
    }
}

/// S3P is inconsistent about wrapping: lists, `{"payItems": [...]}` and
/// bare objects all occur.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    Wrapped {
        #[serde(rename = "payItems")]
        pay_items: Vec<T>,
    },
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::Wrapped { pay_items } => pay_items,
            OneOrMany::One(item) => vec![item],
        }
    }
}
