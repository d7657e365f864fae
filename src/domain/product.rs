use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount};

pub type ProductId = Uuid;
pub type RatingId = Uuid;

/// The only star rating a task accepts.
pub const REQUIRED_STARS: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Spent from the balance when the product is rated
    pub price: Amount,
    pub category: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Amount, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            price,
            category: category.into(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// A completed rating task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: RatingId,
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub stars: u8,
    pub product_price: Amount,
    pub profit: Amount,
    /// UTC day the rating counts towards
    pub rated_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(
        account_id: AccountId,
        product: &Product,
        stars: u8,
        profit: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            product_id: product.id,
            stars,
            product_price: product.price,
            profit,
            rated_on: now.date_naive(),
            created_at: now,
        }
    }
}

/// Products must be rated in catalogue order each day.
/// Returns the first product ahead of `target` in `catalogue` that has not been
/// rated yet, or `None` if `target` may be rated now.
pub fn first_unrated_before<'a>(
    catalogue: &'a [Product],
    rated_today: &HashSet<ProductId>,
    target: ProductId,
) -> Option<&'a Product> {
    catalogue
        .iter()
        .take_while(|product| product.id != target)
        .find(|product| !rated_today.contains(&product.id))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn catalogue() -> Vec<Product> {
        vec![
            Product::new("Headphones", dec!(20), "audio"),
            Product::new("Keyboard", dec!(35), "peripherals"),
            Product::new("Monitor", dec!(120), "displays"),
        ]
    }

    #[test]
    fn test_first_product_is_always_allowed() {
        let products = catalogue();
        assert!(first_unrated_before(&products, &HashSet::new(), products[0].id).is_none());
    }

    #[test]
    fn test_skipping_ahead_is_blocked() {
        let products = catalogue();
        let rated: HashSet<_> = [products[0].id].into_iter().collect();

        let blocking = first_unrated_before(&products, &rated, products[2].id);
        assert_eq!(blocking.map(|p| p.name.as_str()), Some("Keyboard"));
    }

    #[test]
    fn test_in_order_is_allowed() {
        let products = catalogue();
        let rated: HashSet<_> = [products[0].id, products[1].id].into_iter().collect();

        assert!(first_unrated_before(&products, &rated, products[2].id).is_none());
    }

    #[test]
    fn test_rating_captures_price_and_day() {
        let product = Product::new("Lamp", dec!(15.5), "home");
        let now = Utc::now();
        let rating = Rating::new(Uuid::new_v4(), &product, REQUIRED_STARS, dec!(16.275), now);

        assert_eq!(rating.product_price, dec!(15.5));
        assert_eq!(rating.rated_on, now.date_naive());
        assert_eq!(rating.product_id, product.id);
    }
}
