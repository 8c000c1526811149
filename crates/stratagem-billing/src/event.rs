use serde::Deserialize;
use serde_json::Value;

/// Payment provider notification, reduced to the fields settlement reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookEvent {
    /// Event kind, e.g. `charge.success`.
    pub event: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub reference: Option<String>,
    /// Paid amount in minor units; providers send either a number or a string.
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Paid amount as an exact non-negative integer, if present and well formed.
    pub fn paid_amount(&self) -> Option<u64> {
        match self.data.amount.as_ref()? {
            Value::Number(number) => number.as_u64().or_else(|| {
                number
                    .as_f64()
                    .filter(|amount| amount.fract() == 0.0 && *amount >= 0.0)
                    .map(|amount| amount as u64)
            }),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn currency(&self) -> Option<&str> {
        self.data.currency.as_deref().map(str::trim)
    }
}
