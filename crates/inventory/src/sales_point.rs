use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, SalesPointId, UserId};

/// A store location: the unit of stock scoping and staff assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub id: SalesPointId,
    pub name: String,
    pub administrators: BTreeSet<UserId>,
    pub sellers: BTreeSet<UserId>,
}

impl SalesPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SalesPointId::new(),
            name: name.into(),
            administrators: BTreeSet::new(),
            sellers: BTreeSet::new(),
        }
    }

    pub fn staff(&self) -> impl Iterator<Item = &UserId> {
        self.administrators.iter().chain(self.sellers.iter())
    }
}

/// Registry of sales points and the e-mail addresses of their staff.
#[derive(Debug, Default)]
pub struct SalesPointDirectory {
    sales_points: RwLock<HashMap<SalesPointId, SalesPoint>>,
    emails: RwLock<HashMap<UserId, String>>,
}

impl SalesPointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sales_point: SalesPoint) -> DomainResult<SalesPointId> {
        let mut sales_points = self.write_sales_points()?;
        let id = sales_point.id;
        if sales_points.contains_key(&id) {
            return Err(DomainError::conflict(format!("sales point {id} already exists")));
        }
        sales_points.insert(id, sales_point);
        Ok(id)
    }

    pub fn get(&self, id: SalesPointId) -> DomainResult<SalesPoint> {
        self.sales_points
            .read()
            .map_err(|_| DomainError::invariant("sales point lock poisoned"))?
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("sales point {id}")))
    }

    pub fn assign_administrator(
        &self,
        id: SalesPointId,
        user: UserId,
        email: impl Into<String>,
    ) -> DomainResult<()> {
        self.with_sales_point(id, |sp| {
            sp.administrators.insert(user);
        })?;
        self.record_email(user, email.into())
    }

    pub fn assign_seller(
        &self,
        id: SalesPointId,
        user: UserId,
        email: impl Into<String>,
    ) -> DomainResult<()> {
        self.with_sales_point(id, |sp| {
            sp.sellers.insert(user);
        })?;
        self.record_email(user, email.into())
    }

    /// E-mail addresses of administrators then sellers, without duplicates.
    pub fn staff_emails(&self, id: SalesPointId) -> DomainResult<Vec<String>> {
        let sales_point = self.get(id)?;
        let emails = self
            .emails
            .read()
            .map_err(|_| DomainError::invariant("staff e-mail lock poisoned"))?;

        let mut out: Vec<String> = Vec::new();
        for user in sales_point.staff() {
            if let Some(email) = emails.get(user) {
                if !out.contains(email) {
                    out.push(email.clone());
                }
            }
        }
        Ok(out)
    }

    fn with_sales_point(
        &self,
        id: SalesPointId,
        f: impl FnOnce(&mut SalesPoint),
    ) -> DomainResult<()> {
        let mut sales_points = self.write_sales_points()?;
        let sp = sales_points
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("sales point {id}")))?;
        f(sp);
        Ok(())
    }

    fn record_email(&self, user: UserId, email: String) -> DomainResult<()> {
        self.emails
            .write()
            .map_err(|_| DomainError::invariant("staff e-mail lock poisoned"))?
            .insert(user, email);
        Ok(())
    }

    fn write_sales_points(
        &self,
    ) -> DomainResult<std::sync::RwLockWriteGuard<'_, HashMap<SalesPointId, SalesPoint>>> {
        self.sales_points
            .write()
            .map_err(|_| DomainError::invariant("sales point lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_emails_list_admins_then_sellers_once() {
        let directory = SalesPointDirectory::new();
        let id = directory.register(SalesPoint::new("Centro")).unwrap();
        let admin = UserId::new();
        let seller = UserId::new();

        directory.assign_administrator(id, admin, "boss@example.com").unwrap();
        directory.assign_seller(id, seller, "clerk@example.com").unwrap();
        directory.assign_seller(id, admin, "boss@example.com").unwrap();

        assert_eq!(
            directory.staff_emails(id).unwrap(),
            vec!["boss@example.com".to_string(), "clerk@example.com".to_string()]
        );
    }

    #[test]
    fn registering_twice_is_a_conflict() {
        let directory = SalesPointDirectory::new();
        let sp = SalesPoint::new("Norte");
        directory.register(sp.clone()).unwrap();
        assert!(matches!(directory.register(sp), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn unknown_sales_point_has_no_staff() {
        let directory = SalesPointDirectory::new();
        assert!(matches!(
            directory.staff_emails(SalesPointId::new()),
            Err(DomainError::NotFound(_))
        ));
    }
}
