use crate::{parse_decimal, parse_quantity, Availability};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Positions of the named fields inside a positional feed row (0-based).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ColumnMap {
    pub id: Option<usize>,
    pub sku: usize,
    pub barcode: Option<usize>,
    pub name: Option<usize>,
    pub brand: Option<usize>,
    pub price: Option<usize>,
    pub quantity: Option<usize>,
    pub category: Option<usize>,
    pub subcategory: Option<usize>,
    pub url: Option<usize>,
}

impl ColumnMap {
    pub fn cell<'a>(&self, row: &'a [String], column: Option<usize>) -> &'a str {
        column
            .and_then(|c| row.get(c))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    pub fn owned(&self, row: &[String], column: Option<usize>) -> String {
        self.cell(row, column).to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupplierRecord {
    pub sku: String,
    #[serde(default)]
    pub barcode: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    pub price: Option<Decimal>,
    pub quantity: Option<u32>,
    #[serde(default)]
    pub available: Availability,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub url: String,
}

impl SupplierRecord {
    /// Decodes a raw feed row. Missing cells decode as empty fields.
    pub fn decode(row: &[String], columns: &ColumnMap) -> Self {
        let stock = columns.cell(row, columns.quantity);
        let quantity = parse_quantity(stock);
        let available = match columns.quantity {
            Some(_) => Availability::from_stock_text(stock, quantity),
            None => Availability::Available,
        };
        Self {
            sku: columns.owned(row, Some(columns.sku)),
            barcode: columns.owned(row, columns.barcode),
            name: columns.owned(row, columns.name),
            brand: columns.owned(row, columns.brand),
            price: parse_decimal(columns.cell(row, columns.price)),
            quantity,
            available,
            category: columns.owned(row, columns.category),
            subcategory: columns.owned(row, columns.subcategory),
            url: columns.owned(row, columns.url),
        }
    }
}

/// One product of the site export (master inventory).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteRecord {
    pub id: String,
    pub sku: String,
    pub barcode: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub quantity: Option<u32>,
    pub category: String,
    pub url: String,
}

impl SiteRecord {
    pub fn decode(row: &[String], columns: &ColumnMap) -> Self {
        Self {
            id: columns.owned(row, columns.id),
            sku: columns.owned(row, Some(columns.sku)),
            barcode: columns.owned(row, columns.barcode),
            name: columns.owned(row, columns.name),
            price: parse_decimal(columns.cell(row, columns.price)),
            quantity: parse_quantity(columns.cell(row, columns.quantity)),
            category: columns.owned(row, columns.category),
            url: columns.owned(row, columns.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn decodes_supplier_row_by_column_map() {
        let columns = ColumnMap {
            sku: 0,
            barcode: Some(1),
            name: Some(2),
            price: Some(3),
            quantity: Some(4),
            ..Default::default()
        };
        let record = SupplierRecord::decode(
            &row(&[" AB-12 ", "4820168", "Дефлектор", "1 250,00", ">10"]),
            &columns,
        );
        assert_eq!(record.sku, "AB-12");
        assert_eq!(record.price, Some(dec!(1250.00)));
        assert_eq!(record.quantity, Some(10));
        assert_eq!(record.available, Availability::Available);
    }

    #[test]
    fn short_rows_decode_as_empty_fields() {
        let columns = ColumnMap {
            sku: 0,
            barcode: Some(5),
            ..Default::default()
        };
        let record = SiteRecord::decode(&row(&["X1"]), &columns);
        assert_eq!(record.sku, "X1");
        assert_eq!(record.barcode, "");
        assert_eq!(record.price, None);
    }
}
