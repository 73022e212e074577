//! Email address normalization.

use thiserror::Error;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address is too long")]
    TooLong,

    #[error("address is malformed")]
    Malformed,
}

/// Trim and lowercase an address, rejecting anything that is not
/// plausibly `local@domain.tld`.
pub fn normalize_address(raw: &str) -> Result<String, AddressError> {
    let address = raw.trim().to_ascii_lowercase();

    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    if address.len() > MAX_ADDRESS_LEN {
        return Err(AddressError::TooLong);
    }
    if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AddressError::Malformed);
    }

    let (local, domain) = address.split_once('@').ok_or(AddressError::Malformed)?;
    if local.is_empty() || local.len() > MAX_LOCAL_LEN || domain.contains('@') {
        return Err(AddressError::Malformed);
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty() || l.starts_with('-') || l.ends_with('-')) {
        return Err(AddressError::Malformed);
    }

    Ok(address)
}

/// Domain part of an already-normalized address
pub fn domain_of(address: &str) -> Option<&str> {
    address.rsplit_once('@').map(|(_, domain)| domain)
}
