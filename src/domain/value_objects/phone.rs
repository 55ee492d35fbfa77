use crate::domain::errors::ValidationError;

/// A phone number normalized to E.164 format (+[country code][number]),
/// which is what the telephony provider requires for dialing and what
/// inbound caller ids are matched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidPhoneNumber(
                "empty phone number".to_string(),
            ));
        }

        // Already in international format
        if trimmed.starts_with('+') {
            return Ok(PhoneNumber(trimmed.to_string()));
        }

        let digits_only: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits_only.is_empty() {
            return Err(ValidationError::InvalidPhoneNumber(format!(
                "'{}' contains no digits",
                raw
            )));
        }

        // US/Canada numbers are 10 digits without the country code
        if digits_only.len() == 10 {
            return Ok(PhoneNumber(format!("+1{}", digits_only)));
        }

        if digits_only.len() > 10 {
            return Ok(PhoneNumber(format!("+{}", digits_only)));
        }

        tracing::warn!("Phone number {} may not be dialable", raw);
        Ok(PhoneNumber(format!("+{}", digits_only)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
