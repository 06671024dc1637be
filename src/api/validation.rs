//! Field rules shared by request bodies, used via `#[validate(custom = ...)]`.

use rust_decimal::Decimal;
use std::borrow::Cow;
use validator::ValidationError;

use crate::domain::aggregates::Role;
use crate::domain::value_objects::PinCode;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

pub fn valid_pin_code(value: &str) -> Result<(), ValidationError> {
    PinCode::new(value).map(|_| ()).map_err(|_| invalid("pin_code", "PIN Code must be exactly 6 digits"))
}

/// 7 to 15 characters of digits, `+`, `-` or spaces. Empty is allowed.
pub fn valid_phone(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() { return Ok(()); }
    let len = value.chars().count();
    let allowed = value.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' '));
    if !(7..=15).contains(&len) || !allowed {
        return Err(invalid("phone", "phone must be 7-15 digits, spaces, + or -"));
    }
    Ok(())
}

/// Admin accounts are never self-registered.
pub fn self_service_role(role: &Role) -> Result<(), ValidationError> {
    match role {
        Role::Admin => Err(invalid("role", "role must be one of [customer, wholesaler]")),
        _ => Ok(()),
    }
}

pub fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(invalid("amount", "amount must be a positive number"));
    }
    Ok(())
}

/// Wholesalers must name their business.
pub fn business_name_for(role: Role, business_name: Option<&str>) -> Result<(), ValidationError> {
    if role != Role::Wholesaler { return Ok(()); }
    match business_name.map(str::trim) {
        Some(name) if (2..=100).contains(&name.chars().count()) => Ok(()),
        _ => Err(invalid("business_name", "businessName is required for wholesalers (2-100 characters)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_pin_code() {
        assert!(valid_pin_code("141001").is_ok());
        assert!(valid_pin_code("14100").is_err());
        assert!(valid_pin_code("14100a").is_err());
    }

    #[test]
    fn test_valid_phone() {
        assert!(valid_phone("+91 98123-45678").is_ok());
        assert!(valid_phone("").is_ok());
        assert!(valid_phone("12345").is_err());
        assert!(valid_phone("98123x45678").is_err());
    }

    #[test]
    fn test_business_name_for() {
        assert!(business_name_for(Role::Customer, None).is_ok());
        assert!(business_name_for(Role::Wholesaler, None).is_err());
        assert!(business_name_for(Role::Wholesaler, Some(" A ")).is_err());
        assert!(business_name_for(Role::Wholesaler, Some("Singh Auto Parts")).is_ok());
    }

    #[test]
    fn test_amounts_and_roles() {
        assert!(positive_amount(&Decimal::new(1, 2)).is_ok());
        assert!(positive_amount(&Decimal::ZERO).is_err());
        assert!(self_service_role(&Role::Admin).is_err());
        assert!(self_service_role(&Role::Wholesaler).is_ok());
    }
}
