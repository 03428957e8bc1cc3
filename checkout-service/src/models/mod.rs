mod order;
mod product;

pub use order::{Order, OrderStatus, OrderTransition, TransitionOutcome};
pub use product::{Catalog, CatalogEntry, Product, UnknownProduct};
