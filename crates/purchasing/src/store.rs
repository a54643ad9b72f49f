use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use stockroom_core::{AggregateRoot, DomainError, DomainResult, InvoiceId, ReturnId, SalesPointId};

use crate::invoice::Invoice;

#[derive(Debug, Default)]
struct Indexes {
    by_number: HashMap<String, InvoiceId>,
    by_return: HashMap<ReturnId, InvoiceId>,
}

/// In-memory invoice store.
///
/// Invoices sit behind their own mutex; the number and return indexes
/// share one lock that is only ever taken last.
#[derive(Debug, Default)]
pub struct InvoiceStore {
    invoices: RwLock<BTreeMap<InvoiceId, Arc<Mutex<Invoice>>>>,
    indexes: RwLock<Indexes>,
}

impl InvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly created invoice. Numbers are unique.
    pub fn insert(&self, invoice: Invoice) -> DomainResult<()> {
        let id = *invoice.id();
        let mut invoices = self
            .invoices
            .write()
            .map_err(|_| DomainError::invariant("invoice store lock poisoned"))?;
        let mut indexes = self.write_indexes()?;

        if invoices.contains_key(&id) {
            return Err(DomainError::conflict(format!("invoice {id} already exists")));
        }
        if indexes.by_number.contains_key(invoice.invoice_number()) {
            return Err(DomainError::conflict(format!(
                "invoice number {} is already taken",
                invoice.invoice_number()
            )));
        }

        indexes.by_number.insert(invoice.invoice_number().to_string(), id);
        invoices.insert(id, Arc::new(Mutex::new(invoice)));
        Ok(())
    }

    pub fn number_taken(&self, number: &str) -> DomainResult<bool> {
        Ok(self.read_indexes()?.by_number.contains_key(number))
    }

    pub fn get(&self, id: InvoiceId) -> DomainResult<Invoice> {
        let handle = self.handle(id)?;
        let invoice = handle
            .lock()
            .map_err(|_| DomainError::invariant("invoice lock poisoned"))?;
        Ok(invoice.clone())
    }

    pub fn by_number(&self, number: &str) -> DomainResult<Invoice> {
        let id = self
            .read_indexes()?
            .by_number
            .get(number)
            .copied()
            .ok_or_else(|| DomainError::not_found(format!("invoice number {number}")))?;
        self.get(id)
    }

    pub fn handle(&self, id: InvoiceId) -> DomainResult<Arc<Mutex<Invoice>>> {
        self.invoices
            .read()
            .map_err(|_| DomainError::invariant("invoice store lock poisoned"))?
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("invoice {id}")))
    }

    /// Invoice owning a recorded return.
    pub fn invoice_for_return(&self, return_id: ReturnId) -> DomainResult<InvoiceId> {
        self.read_indexes()?
            .by_return
            .get(&return_id)
            .copied()
            .ok_or_else(|| DomainError::not_found(format!("return {return_id}")))
    }

    pub(crate) fn index_return(&self, return_id: ReturnId, invoice: InvoiceId) -> DomainResult<()> {
        self.write_indexes()?.by_return.insert(return_id, invoice);
        Ok(())
    }

    pub(crate) fn unindex_return(&self, return_id: ReturnId) -> DomainResult<()> {
        self.write_indexes()?.by_return.remove(&return_id);
        Ok(())
    }

    pub fn for_sales_point(&self, sales_point: SalesPointId) -> DomainResult<Vec<Invoice>> {
        let handles: Vec<_> = self
            .invoices
            .read()
            .map_err(|_| DomainError::invariant("invoice store lock poisoned"))?
            .values()
            .cloned()
            .collect();

        let mut out = Vec::new();
        for handle in handles {
            let invoice = handle
                .lock()
                .map_err(|_| DomainError::invariant("invoice lock poisoned"))?;
            if invoice.sales_point() == sales_point {
                out.push(invoice.clone());
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> DomainResult<usize> {
        Ok(self
            .invoices
            .read()
            .map_err(|_| DomainError::invariant("invoice store lock poisoned"))?
            .len())
    }

    pub fn is_empty(&self) -> DomainResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read_indexes(&self) -> DomainResult<std::sync::RwLockReadGuard<'_, Indexes>> {
        self.indexes
            .read()
            .map_err(|_| DomainError::invariant("invoice index lock poisoned"))
    }

    fn write_indexes(&self) -> DomainResult<std::sync::RwLockWriteGuard<'_, Indexes>> {
        self.indexes
            .write()
            .map_err(|_| DomainError::invariant("invoice index lock poisoned"))
    }
}
