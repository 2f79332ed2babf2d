//! Input validation for LC terms and invitations
//!
//! All checks here are caller-fault checks: they run before any side effect
//! and fail with `ValidationError`.

use crate::error::{EngineError, Result};
use crate::models::lc::LcTerms;

/// Validate LC terms at creation time.
///
/// Enforced invariants: amount equals quantity × unit_price, the latest
/// shipment date precedes expiry, the required-document set is non-empty,
/// and both parties are distinct with positive quantities/prices.
pub fn validate_terms(terms: &LcTerms) -> Result<()> {
    if terms.quantity <= 0 {
        return Err(EngineError::Validation(format!(
            "quantity must be positive, got {}",
            terms.quantity
        )));
    }
    if terms.unit_price <= 0 {
        return Err(EngineError::Validation(format!(
            "unit_price must be positive, got {}",
            terms.unit_price
        )));
    }
    let total = terms.total_value().ok_or_else(|| {
        EngineError::Validation(format!(
            "quantity {} x unit_price {} overflows the amount range",
            terms.quantity, terms.unit_price
        ))
    })?;
    if terms.amount != total {
        return Err(EngineError::Validation(format!(
            "amount {} != quantity {} x unit_price {}",
            terms.amount, terms.quantity, terms.unit_price
        )));
    }
    if terms.latest_shipment_date >= terms.expiry_date {
        return Err(EngineError::Validation(format!(
            "latest_shipment_date {} must precede expiry_date {}",
            terms.latest_shipment_date, terms.expiry_date
        )));
    }
    if terms.required_documents.is_empty() {
        return Err(EngineError::Validation("required_documents must not be empty".into()));
    }
    if terms.buyer.matrix_id == terms.seller.matrix_id {
        return Err(EngineError::Validation(
            "buyer and seller must be distinct parties".into(),
        ));
    }
    if terms.commodity.trim().is_empty() {
        return Err(EngineError::Validation("commodity must not be empty".into()));
    }
    Ok(())
}

/// Validate invitation inputs before creation
pub fn validate_invitation(lc_title: &str, initiator_id: &str, invitee_id: &str) -> Result<()> {
    if lc_title.trim().is_empty() {
        return Err(EngineError::Validation("lc_title must not be empty".into()));
    }
    if initiator_id == invitee_id {
        return Err(EngineError::Validation("cannot invite yourself".into()));
    }
    Ok(())
}
