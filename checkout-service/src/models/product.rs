use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Purchasable plans. Prices never come from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Solo,
    Support,
}

impl Product {
    pub const ALL: [Product; 2] = [Product::Solo, Product::Support];

    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Solo => "solo",
            Product::Support => "support",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown product: {0}")]
pub struct UnknownProduct(pub String);

impl FromStr for Product {
    type Err = UnknownProduct;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "solo" => Ok(Product::Solo),
            "support" => Ok(Product::Support),
            other => Err(UnknownProduct(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub price: Decimal,
}

/// Server-side price list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub solo: CatalogEntry,
    pub support: CatalogEntry,
}

impl Catalog {
    pub fn entry(&self, product: Product) -> &CatalogEntry {
        match product {
            Product::Solo => &self.solo,
            Product::Support => &self.support,
        }
    }
}
