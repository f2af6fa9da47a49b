use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use ts_rs::TS;

/// Smallest accepted gift: $1.00
pub const MIN_AMOUNT_CENTS: i64 = 100;
/// Largest accepted gift: $100,000.00
pub const MAX_AMOUNT_CENTS: i64 = 10_000_000;

pub const PURPOSES: &[&str] = &[
    "Offering",
    "Tithe",
    "Thanksgiving",
    "Welfare",
    "Church projects",
    "Seed",
    "Mission",
];
pub const DEFAULT_PURPOSE: &str = "Offering";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GivingFrequency {
    Weekly,
    Monthly,
}

impl GivingFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            GivingFrequency::Weekly => "weekly",
            GivingFrequency::Monthly => "monthly",
        }
    }
}

/// One-time donation request body
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct DonationRequest {
    /// Dollar amount, e.g. 25.00
    pub amount: f64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub purpose: Option<String>,
}

/// Recurring donation request body
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub amount: f64,
    pub frequency: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub purpose: Option<String>,
}

/// Contact form request body
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub message_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidatedDonation {
    pub amount_cents: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub purpose: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedSubscription {
    pub amount_cents: i64,
    pub frequency: GivingFrequency,
    pub name: Option<String>,
    pub email: Option<String>,
    pub purpose: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub message_type: String,
}

fn validate_amount(amount: f64) -> Result<i64, String> {
    if !amount.is_finite() {
        return Err("Amount must be a number".to_string());
    }
    let cents = (amount * 100.0).round() as i64;
    if cents < MIN_AMOUNT_CENTS {
        return Err("Minimum donation amount is $1".to_string());
    }
    if cents > MAX_AMOUNT_CENTS {
        return Err("Maximum donation amount is $100,000".to_string());
    }
    Ok(cents)
}

fn validate_email(email: &str) -> Result<(), String> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err("Invalid email address".to_string())
    }
}

fn validate_optional_email(email: Option<&String>) -> Result<Option<String>, String> {
    match email.map(|e| e.trim()).filter(|e| !e.is_empty()) {
        Some(e) => {
            validate_email(e)?;
            Ok(Some(e.to_string()))
        }
        None => Ok(None),
    }
}

fn validate_purpose(purpose: Option<&String>) -> Result<String, String> {
    match purpose.map(|p| p.trim()).filter(|p| !p.is_empty()) {
        Some(p) => {
            if PURPOSES.contains(&p) {
                Ok(p.to_string())
            } else {
                Err("Invalid giving purpose".to_string())
            }
        }
        None => Ok(DEFAULT_PURPOSE.to_string()),
    }
}

fn trimmed_optional(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

impl DonationRequest {
    pub fn validate(&self) -> Result<ValidatedDonation, String> {
        Ok(ValidatedDonation {
            amount_cents: validate_amount(self.amount)?,
            name: trimmed_optional(self.name.as_ref()),
            email: validate_optional_email(self.email.as_ref())?,
            message: trimmed_optional(self.message.as_ref()),
            purpose: validate_purpose(self.purpose.as_ref())?,
        })
    }
}

impl SubscriptionRequest {
    pub fn validate(&self) -> Result<ValidatedSubscription, String> {
        let frequency = match self.frequency.trim().to_ascii_lowercase().as_str() {
            "weekly" => GivingFrequency::Weekly,
            "monthly" => GivingFrequency::Monthly,
            _ => return Err("Frequency must be weekly or monthly".to_string()),
        };
        Ok(ValidatedSubscription {
            amount_cents: validate_amount(self.amount)?,
            frequency,
            name: trimmed_optional(self.name.as_ref()),
            email: validate_optional_email(self.email.as_ref())?,
            purpose: validate_purpose(self.purpose.as_ref())?,
        })
    }
}

impl ContactRequest {
    pub fn validate(&self) -> Result<ValidatedContact, String> {
        let name = self.name.trim();
        if name.len() < 2 || name.len() > 100 {
            return Err("Name must be between 2 and 100 characters".to_string());
        }

        let email = self.email.trim();
        validate_email(email)?;

        let phone = trimmed_optional(self.phone.as_ref());
        if let Some(phone) = &phone
            && phone.len() > 20
        {
            return Err("Phone number must be at most 20 characters".to_string());
        }

        let subject = self.subject.trim();
        if subject.len() < 3 || subject.len() > 200 {
            return Err("Subject must be between 3 and 200 characters".to_string());
        }

        let message = self.message.trim();
        if message.len() < 10 || message.len() > 2000 {
            return Err("Message must be between 10 and 2000 characters".to_string());
        }

        let message_type = match self
            .message_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            Some("general") | None => "general",
            Some("prayer") => "prayer",
            Some("visitor") => "visitor",
            Some(_) => return Err("Invalid message type".to_string()),
        };

        Ok(ValidatedContact {
            name: name.to_string(),
            email: email.to_string(),
            phone,
            subject: subject.to_string(),
            message: message.to_string(),
            message_type: message_type.to_string(),
        })
    }
}
