//! Payout destination identifiers.
//!
//! Both types only exist in a valid state: construction is the validation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

const ACCOUNT_NUMBER_LEN: usize = 10;
const BANK_CODE_LEN: usize = 3;

fn all_digits(input: &str, len: usize) -> bool {
    input.len() == len && input.bytes().all(|b| b.is_ascii_digit())
}

/// NUBAN account number: exactly ten ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        if input.is_empty() {
            return Err(DomainError::Validation(
                "Account number is required".into(),
            ));
        }
        if !all_digits(input, ACCOUNT_NUMBER_LEN) {
            return Err(DomainError::Validation(format!(
                "Account number must be exactly {} digits",
                ACCOUNT_NUMBER_LEN
            )));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for AccountNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(value: AccountNumber) -> Self {
        value.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CBN bank code: exactly three ASCII digits, leading zeros significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BankCode(String);

impl BankCode {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        if !all_digits(input, BANK_CODE_LEN) {
            return Err(DomainError::Validation(format!(
                "Bank code must be exactly {} digits",
                BANK_CODE_LEN
            )));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for BankCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BankCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BankCode> for String {
    fn from(value: BankCode) -> Self {
        value.0
    }
}

impl fmt::Display for BankCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
