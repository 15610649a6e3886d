//! Read-only record type catalog and previews used to pick deletion targets.

use crate::engine::discovery::sanitize_category;
use crate::errors::{DiscoveryError, EngineError};
use crate::store::{PreviewQuery, PreviewRow, RecordKind, RecordStore, RecordType};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Standard record types offered for selection, as `(id, display name)`.
pub const BUILTIN_RECORD_TYPES: [(&str, &str); 23] = [
    ("deposit", "Deposit"),
    ("customerpayment", "Customer Payment"),
    ("creditmemo", "Credit Memo"),
    ("cashrefund", "Cash Refund"),
    ("invoice", "Invoice"),
    ("cashsale", "Cash Sale"),
    ("returnauthorization", "Return Authorization"),
    ("itemfulfillment", "Item Fulfillment"),
    ("salesorder", "Sales Order"),
    ("estimate", "Quote / Estimate"),
    ("vendorpayment", "Bill Payment"),
    ("vendorcredit", "Vendor Credit"),
    ("vendorbill", "Vendor Bill"),
    ("vendorreturnauthorization", "Vendor Return Authorization"),
    ("itemreceipt", "Item Receipt"),
    ("purchaseorder", "Purchase Order"),
    ("purchaserequisition", "Requisition"),
    ("transferorder", "Transfer Order"),
    ("journalentry", "Journal Entry"),
    ("customer", "Customer"),
    ("vendor", "Vendor"),
    ("contact", "Contact"),
    ("employee", "Employee"),
];

/// One previewed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPreview {
    pub id: i64,
    pub display_label: String,
}

/// Built-in types, configured extras and the store's active custom types,
/// sorted by display name. A failing custom type lookup is logged and the
/// remaining types are still returned.
pub async fn list_eligible_record_types(
    store: &dyn RecordStore,
    extra: &[RecordType],
) -> Vec<RecordType> {
    let mut types: Vec<RecordType> = BUILTIN_RECORD_TYPES
        .iter()
        .map(|(id, name)| RecordType::new(id, name))
        .collect();

    for record_type in extra {
        if !types.iter().any(|t| t.id == record_type.id) {
            types.push(record_type.clone());
        }
    }

    match store.custom_record_types().await {
        Ok(custom) => {
            for record_type in custom {
                if !types.iter().any(|t| t.id == record_type.id) {
                    types.push(record_type);
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not load custom record types"),
    }

    types.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    types
}

/// Newest records of `category`, at most `limit`.
pub async fn preview_records(
    store: &dyn RecordStore,
    category: &str,
    limit: usize,
) -> Result<Vec<RecordPreview>, EngineError> {
    let source = sanitize_category(category);
    if source.is_empty() {
        return Err(DiscoveryError::InvalidCategory(category.to_string()).into());
    }

    let kind = RecordKind::of(&source);
    let rows = store
        .preview(&PreviewQuery {
            source,
            kind,
            limit,
        })
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| RecordPreview {
            id: row.id,
            display_label: display_label(kind, &row),
        })
        .collect())
}

/// Label a preview row: custom records by name, entities by entity id and
/// alternate name, transactions by document number and memo.
pub fn display_label(kind: RecordKind, row: &PreviewRow) -> String {
    let doc_id = row.doc_id.as_deref().unwrap_or("").trim();
    let name = row.name.as_deref().unwrap_or("").trim();

    let label = match kind {
        RecordKind::Custom => {
            if name.is_empty() {
                doc_id.to_string()
            } else {
                name.to_string()
            }
        }
        RecordKind::Entity | RecordKind::Transaction => match (doc_id.is_empty(), name.is_empty()) {
            (false, false) => format!("{} {}", doc_id, name),
            (false, true) => doc_id.to_string(),
            (true, false) => name.to_string(),
            (true, true) => String::new(),
        },
    };

    if label.is_empty() {
        format!("#{}", row.id)
    } else {
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, StoredRecord};

    fn row(doc_id: Option<&str>, name: Option<&str>) -> PreviewRow {
        PreviewRow {
            id: 7,
            doc_id: doc_id.map(String::from),
            name: name.map(String::from),
        }
    }

    #[test]
    fn test_display_label_by_kind() {
        assert_eq!(
            display_label(RecordKind::Transaction, &row(Some("INV-1"), Some("March"))),
            "INV-1 March"
        );
        assert_eq!(
            display_label(RecordKind::Transaction, &row(Some("INV-1"), None)),
            "INV-1"
        );
        assert_eq!(
            display_label(RecordKind::Entity, &row(Some("C100"), Some("Acme Ltd"))),
            "C100 Acme Ltd"
        );
        assert_eq!(
            display_label(RecordKind::Custom, &row(Some("ignored"), Some("Widget A"))),
            "Widget A"
        );
        assert_eq!(display_label(RecordKind::Custom, &row(None, None)), "#7");
    }

    #[tokio::test]
    async fn test_list_includes_builtin_and_custom_sorted() {
        let store = InMemoryStore::new();
        store.add_custom_type(RecordType::new("customrecord_asset", "Asset Register"));
        let types = list_eligible_record_types(&store, &[]).await;

        assert_eq!(types.len(), 24);
        assert_eq!(types[0].display_name, "Asset Register");
        let names: Vec<&str> = types.iter().map(|t| t.display_name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|n| n.to_lowercase());
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_custom_type_failure_is_ignored() {
        let store = InMemoryStore::new();
        store.fail_custom_types();
        let types = list_eligible_record_types(&store, &[]).await;
        assert_eq!(types.len(), BUILTIN_RECORD_TYPES.len());
    }

    #[tokio::test]
    async fn test_extra_types_are_deduplicated() {
        let store = InMemoryStore::new();
        let extra = vec![
            RecordType::new("invoice", "Invoice (dup)"),
            RecordType::new("customrecord_x", "X Records"),
        ];
        let types = list_eligible_record_types(&store, &extra).await;
        assert_eq!(types.len(), 24);
        assert!(!types.iter().any(|t| t.display_name == "Invoice (dup)"));
    }

    #[tokio::test]
    async fn test_preview_is_bounded_and_newest_first() {
        let store = InMemoryStore::new();
        for n in 1..=5 {
            store.insert(
                StoredRecord::transaction("invoice", "CustInvc")
                    .with_label(&format!("INV-{}", n), ""),
            );
        }
        let previews = preview_records(&store, "invoice", 3).await.unwrap();
        assert_eq!(previews.len(), 3);
        assert_eq!(previews[0].display_label, "INV-5");
    }

    #[tokio::test]
    async fn test_preview_rejects_empty_category() {
        let store = InMemoryStore::new();
        let err = preview_records(&store, "; --", 10).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Discovery(DiscoveryError::InvalidCategory(_))
        ));
    }
}
