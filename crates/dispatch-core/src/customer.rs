//! Customer aggregate.

use crate::changes::TrackedEntity;
use crate::entity::{Entity, EntityFilter, EntitySort, contains_ignore_case};
use crate::ids::CustomerId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    id: CustomerId,
    name: String,
    email: String,
    phone: String,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Customer {
    pub fn create(name: &str, email: &str, phone: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("customer name is required".into()));
        }
        Ok(Self {
            id: CustomerId::new(),
            name: name.to_string(),
            email: normalize_email(email)?,
            phone: normalize_phone(phone)?,
            created_at: Utc::now(),
            version: 0,
        })
    }

    pub fn update_contact_info(&mut self, email: &str, phone: &str) -> Result<()> {
        let email = normalize_email(email)?;
        let phone = normalize_phone(phone)?;
        self.email = email;
        self.phone = phone;
        Ok(())
    }

    pub fn id(&self) -> CustomerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(Error::Validation(format!(
            "a valid customer email is required, got '{email}'"
        )));
    }
    Ok(email)
}

fn normalize_phone(phone: &str) -> Result<String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err(Error::Validation("customer phone is required".into()));
    }
    Ok(phone.to_string())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

/// Flat representation of a stored customer.
#[derive(Debug, Clone)]
pub struct CustomerRecord {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl TryFrom<CustomerRecord> for Customer {
    type Error = Error;

    fn try_from(record: CustomerRecord) -> Result<Self> {
        if record.name.trim().is_empty() {
            return Err(Error::Validation("customer name is required".into()));
        }
        Ok(Self {
            id: record.id,
            name: record.name,
            email: normalize_email(&record.email)?,
            phone: normalize_phone(&record.phone)?,
            created_at: record.created_at,
            version: record.version,
        })
    }
}

impl Entity for Customer {
    type Id = CustomerId;
    type Filter = CustomerFilter;
    type Sort = CustomerSort;

    const NAME: &'static str = "customer";

    fn id(&self) -> CustomerId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn into_tracked(self) -> TrackedEntity {
        TrackedEntity::Customer(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<DateTime<Utc>>,
}

impl CustomerFilter {
    pub fn name_contains(term: impl Into<String>) -> Self {
        Self {
            name_contains: Some(term.into()),
            ..Default::default()
        }
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }
}

impl EntityFilter<Customer> for CustomerFilter {
    fn matches(&self, customer: &Customer) -> bool {
        self.name_contains
            .as_deref()
            .is_none_or(|term| contains_ignore_case(&customer.name, term))
            && self
                .email
                .as_deref()
                .is_none_or(|email| customer.email == email.trim().to_lowercase())
            && self.created_from.is_none_or(|from| customer.created_at >= from)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSort {
    #[default]
    Name,
    Email,
    CreatedAt,
}

impl EntitySort<Customer> for CustomerSort {
    fn compare(&self, a: &Customer, b: &Customer) -> Ordering {
        match self {
            CustomerSort::Name => a.name.cmp(&b.name),
            CustomerSort::Email => a.email.cmp(&b.email),
            CustomerSort::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_normalizes_fields() {
        let customer = Customer::create("  Ana Torres ", " Ana@Example.COM ", " 555-0101 ").unwrap();
        assert_eq!(customer.name(), "Ana Torres");
        assert_eq!(customer.email(), "ana@example.com");
        assert_eq!(customer.phone(), "555-0101");
    }

    #[test]
    fn test_create_validates() {
        assert!(Customer::create(" ", "a@b.co", "1").is_err());
        assert!(Customer::create("Ana", "not-an-email", "1").is_err());
        assert!(Customer::create("Ana", "a@b", "1").is_err());
        assert!(Customer::create("Ana", "a b@c.io", "1").is_err());
        assert!(Customer::create("Ana", "a@b.co", "  ").is_err());
    }

    #[test]
    fn test_update_contact_info_is_all_or_nothing() {
        let mut customer = Customer::create("Ana", "ana@example.com", "1").unwrap();
        assert!(customer.update_contact_info("new@example.com", "").is_err());
        assert_eq!(customer.email(), "ana@example.com");

        customer.update_contact_info("NEW@example.com", "2").unwrap();
        assert_eq!(customer.email(), "new@example.com");
        assert_eq!(customer.phone(), "2");
    }

    #[test]
    fn test_filter_by_name_and_email() {
        let customer = Customer::create("Ana Torres", "ana@example.com", "1").unwrap();
        assert!(CustomerFilter::name_contains("torr").matches(&customer));
        assert!(!CustomerFilter::name_contains("luis").matches(&customer));
        assert!(CustomerFilter::email("ANA@example.com").matches(&customer));
    }
}
