//! Customer records and the directory contract the engine reads them through.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LoyaltyError, LoyaltyResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub referred_by: Option<Uuid>,
}

/// Read access to the customer store owned by another service.
pub trait CustomerDirectory: Send + Sync {
    fn get_customer(&self, id: Uuid) -> Option<Customer>;
    fn find_by_referral_code(&self, code: &str) -> Option<Customer>;
}

/// `DashMap`-backed directory with unique email and referral-code indexes.
#[derive(Debug, Default)]
pub struct InMemoryCustomerDirectory {
    customers: DashMap<Uuid, Customer>,
    by_email: DashMap<String, Uuid>,
    by_code: DashMap<String, Uuid>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a customer, enforcing unique email/code and a valid `referred_by`.
    pub fn insert(&self, customer: Customer) -> LoyaltyResult<()> {
        if let Some(referrer) = customer.referred_by {
            if referrer == customer.id {
                return Err(LoyaltyError::InvalidReferral(
                    "customer cannot refer themselves".into(),
                ));
            }
            if !self.customers.contains_key(&referrer) {
                return Err(LoyaltyError::CustomerNotFound(referrer));
            }
        }

        let email = customer.email.to_lowercase();
        if let Some(existing) = self.by_email.get(&email) {
            if *existing != customer.id {
                return Err(LoyaltyError::Config(format!(
                    "email {} already registered",
                    customer.email
                )));
            }
        }
        if let Some(code) = &customer.referral_code {
            if let Some(existing) = self.by_code.get(code) {
                if *existing != customer.id {
                    return Err(LoyaltyError::Config(format!(
                        "referral code {code} already in use"
                    )));
                }
            }
            self.by_code.insert(code.clone(), customer.id);
        }
        self.by_email.insert(email, customer.id);

        debug!(customer_id = %customer.id, "Customer registered");
        self.customers.insert(customer.id, customer);
        Ok(())
    }

    /// Record that `id` was referred by `referrer_id`.
    pub fn set_referred_by(&self, id: Uuid, referrer_id: Uuid) -> LoyaltyResult<()> {
        if id == referrer_id {
            return Err(LoyaltyError::InvalidReferral(
                "customer cannot refer themselves".into(),
            ));
        }
        if !self.customers.contains_key(&referrer_id) {
            return Err(LoyaltyError::CustomerNotFound(referrer_id));
        }
        let mut customer = self
            .customers
            .get_mut(&id)
            .ok_or(LoyaltyError::CustomerNotFound(id))?;
        customer.referred_by = Some(referrer_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

impl CustomerDirectory for InMemoryCustomerDirectory {
    fn get_customer(&self, id: Uuid) -> Option<Customer> {
        self.customers.get(&id).map(|c| c.clone())
    }

    fn find_by_referral_code(&self, code: &str) -> Option<Customer> {
        let id = *self.by_code.get(code)?;
        self.get_customer(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(email: &str, code: Option<&str>) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            email: email.to_string(),
            referral_code: code.map(str::to_string),
            referred_by: None,
        }
    }

    #[test]
    fn test_lookup_by_code() {
        let dir = InMemoryCustomerDirectory::new();
        let alice = customer("alice@example.com", Some("ALICE10"));
        dir.insert(alice.clone()).unwrap();

        assert_eq!(dir.find_by_referral_code("ALICE10"), Some(alice.clone()));
        assert_eq!(dir.get_customer(alice.id), Some(alice));
        assert!(dir.find_by_referral_code("NOPE").is_none());
    }

    #[test]
    fn test_unique_email_and_code() {
        let dir = InMemoryCustomerDirectory::new();
        dir.insert(customer("a@example.com", Some("CODE"))).unwrap();

        assert!(dir.insert(customer("A@example.com", None)).is_err());
        assert!(dir.insert(customer("b@example.com", Some("CODE"))).is_err());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_referred_by_must_exist_and_differ() {
        let dir = InMemoryCustomerDirectory::new();
        let mut c = customer("c@example.com", None);
        c.referred_by = Some(c.id);
        assert!(matches!(
            dir.insert(c.clone()),
            Err(LoyaltyError::InvalidReferral(_))
        ));

        c.referred_by = Some(Uuid::new_v4());
        assert!(matches!(
            dir.insert(c),
            Err(LoyaltyError::CustomerNotFound(_))
        ));
    }

    #[test]
    fn test_set_referred_by() {
        let dir = InMemoryCustomerDirectory::new();
        let referrer = customer("r@example.com", Some("R1"));
        let friend = customer("f@example.com", None);
        dir.insert(referrer.clone()).unwrap();
        dir.insert(friend.clone()).unwrap();

        assert!(matches!(
            dir.set_referred_by(friend.id, friend.id),
            Err(LoyaltyError::InvalidReferral(_))
        ));
        assert!(matches!(
            dir.set_referred_by(friend.id, Uuid::new_v4()),
            Err(LoyaltyError::CustomerNotFound(_))
        ));

        dir.set_referred_by(friend.id, referrer.id).unwrap();
        assert_eq!(dir.get_customer(friend.id).unwrap().referred_by, Some(referrer.id));
    }
}
