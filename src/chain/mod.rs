//! Chain registry: named, ordered stage lists describing deletion order.
//!
//! A chain is a fixed list of stages. Stage order is a topological order of
//! the deletion dependency graph: dependents come first, the records they
//! reference come later. Stages are plain data (category, source table and an
//! equality filter) so they can be validated, printed and declared in
//! `reaper.toml`.
//!
//! ```
//! use reaper::chain::ChainRegistry;
//!
//! let registry = ChainRegistry::builtin();
//! let o2c = registry.resolve("O2C").unwrap();
//! assert_eq!(o2c.stages[0].category, "customerpayment");
//! ```

use crate::errors::ChainError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern is valid"));

/// Returns true when `value` is safe to use as a table or column name.
pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

/// Equality predicate selecting the deletable members of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFilter {
    /// Column compared against `value`
    pub field: String,
    /// Expected column value
    pub value: String,
}

impl StageFilter {
    pub fn new(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for StageFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = '{}'", self.field, self.value.replace('\'', "''"))
    }
}

/// One step of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Record type passed to the store's delete primitive
    pub category: String,
    /// Table queried to find eligible records
    pub source: String,
    /// Predicate restricting `source` to this stage's records
    pub filter: StageFilter,
}

impl Stage {
    pub fn new(category: &str, source: &str, filter: StageFilter) -> Self {
        Self {
            category: category.to_string(),
            source: source.to_string(),
            filter,
        }
    }

    /// Shorthand for a transaction stage filtered on its type code.
    pub fn transaction(category: &str, type_code: &str) -> Self {
        Self::new(category, "transaction", StageFilter::new("type", type_code))
    }
}

/// A named chain of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Chain {
    pub fn new(name: &str, stages: Vec<Stage>) -> Self {
        Self {
            name: name.to_string(),
            stages,
        }
    }

    fn validate(&self) -> Result<(), ChainError> {
        if self.stages.is_empty() {
            return Err(ChainError::Empty {
                name: self.name.clone(),
            });
        }
        for stage in &self.stages {
            for (what, value) in [
                ("category", &stage.category),
                ("source", &stage.source),
                ("filter field", &stage.filter.field),
            ] {
                if !is_identifier(value) {
                    return Err(ChainError::InvalidIdentifier {
                        chain: self.name.clone(),
                        what,
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Order-to-cash: payments and credits before the invoices they settle,
/// invoices and fulfillments before the sales orders that spawned them.
pub fn order_to_cash() -> Chain {
    Chain::new(
        "O2C",
        vec![
            Stage::transaction("customerpayment", "CustPymt"),
            Stage::transaction("creditmemo", "CustCred"),
            Stage::transaction("depositapplication", "DepAppl"),
            Stage::transaction("customerdeposit", "CustDep"),
            Stage::transaction("cashrefund", "CashRfnd"),
            Stage::transaction("returnauthorization", "RtnAuth"),
            Stage::transaction("itemfulfillment", "ItemShip"),
            Stage::transaction("invoice", "CustInvc"),
            Stage::transaction("cashsale", "CashSale"),
            Stage::transaction("salesorder", "SalesOrd"),
        ],
    )
}

/// Procure-to-pay: bill payments and credits before bills, receipts before
/// purchase orders.
pub fn procure_to_pay() -> Chain {
    Chain::new(
        "P2P",
        vec![
            Stage::transaction("vendorpayment", "VendPymt"),
            Stage::transaction("vendorcredit", "VendCred"),
            Stage::transaction("vendorbill", "VendBill"),
            Stage::transaction("vendorreturnauthorization", "VendRtnAuth"),
            Stage::transaction("itemreceipt", "ItemRcpt"),
            Stage::transaction("purchaseorder", "PurchOrd"),
        ],
    )
}

/// Immutable name → chain mapping, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<String, Chain>,
}

impl ChainRegistry {
    /// Build a registry from explicit chains, rejecting duplicates and
    /// malformed stages.
    pub fn new(chains: Vec<Chain>) -> Result<Self, ChainError> {
        let mut map = BTreeMap::new();
        for chain in chains {
            chain.validate()?;
            if map.contains_key(&chain.name) {
                return Err(ChainError::Duplicate { name: chain.name });
            }
            map.insert(chain.name.clone(), chain);
        }
        Ok(Self { chains: map })
    }

    /// Registry holding the built-in O2C and P2P chains.
    pub fn builtin() -> Self {
        Self::new(vec![order_to_cash(), procure_to_pay()])
            .expect("built-in chains are valid and distinct")
    }

    /// Built-in chains plus chains declared in configuration.
    pub fn with_extra(extra: Vec<Chain>) -> Result<Self, ChainError> {
        let mut chains = vec![order_to_cash(), procure_to_pay()];
        chains.extend(extra);
        Self::new(chains)
    }

    /// Look up a chain by exact name.
    pub fn resolve(&self, name: &str) -> Result<&Chain, ChainError> {
        self.chains.get(name).ok_or_else(|| ChainError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.chains.contains_key(name)
    }

    /// All chains, ordered by name.
    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
