//! Attendee cart: one owned context per process, injected where needed.

use crate::types::{Event, Photo, PhotoId, Price, PurchaseTier};
use serde::{Deserialize, Serialize};

/// A purchase line handed to the cart collaborator.
///
/// `unit_price` is a snapshot taken when the line was added; later pricing
/// edits on the event do not touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub photo_id: PhotoId,
    pub tier: PurchaseTier,
    pub unit_price: Price,
    pub label: String,
    pub thumbnail_url: String,
}

impl CartLineItem {
    /// Build a line for `photo` at the event's current price for `tier`.
    pub fn snapshot(event: &Event, photo: &Photo, tier: PurchaseTier) -> Self {
        Self {
            photo_id: photo.id.clone(),
            tier,
            unit_price: event.pricing.price(tier),
            label: tier.label().to_string(),
            thumbnail_url: photo.display_url.clone(),
        }
    }
}

/// Receiver of purchase lines.
pub trait CartSink {
    /// Returns false if an identical photo+tier line is already present.
    fn add(&mut self, item: CartLineItem) -> bool;
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Cart {
    items: Vec<CartLineItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_photo(&mut self, event: &Event, photo: &Photo, tier: PurchaseTier) -> Option<CartLineItem> {
        let item = CartLineItem::snapshot(event, photo, tier);
        self.add(item.clone()).then_some(item)
    }

    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total(&self) -> Price {
        self.items.iter().map(|i| i.unit_price).sum()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Hand back the purchased lines and start a fresh cart.
    pub fn complete_checkout(&mut self) -> Vec<CartLineItem> {
        let items = std::mem::take(&mut self.items);
        tracing::info!(items = items.len(), "checkout completed");
        items
    }
}

impl CartSink for Cart {
    fn add(&mut self, item: CartLineItem) -> bool {
        if self
            .items
            .iter()
            .any(|i| i.photo_id == item.photo_id && i.tier == item.tier)
        {
            return false;
        }
        tracing::debug!(photo_id = %item.photo_id, tier = ?item.tier, price = %item.unit_price, "cart line added");
        self.items.push(item);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PhotoStatus, Pricing};
    use chrono::{NaiveDate, Utc};

    fn event() -> Event {
        Event {
            id: "e1".into(),
            name: "Gala".into(),
            slug: None,
            date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            agency_id: "agency".into(),
            pricing: Pricing::default(),
        }
    }

    fn photo(id: &str) -> Photo {
        Photo {
            id: id.into(),
            event_id: "e1".into(),
            agency_id: "agency".into(),
            original_url: format!("file:///orig/{id}"),
            display_url: format!("file:///display/{id}"),
            descriptor: None,
            status: PhotoStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_price_snapshot_survives_pricing_edit() {
        let mut event = event();
        let mut cart = Cart::new();
        let line = cart.add_photo(&event, &photo("p1"), PurchaseTier::Social).unwrap();
        assert_eq!(line.unit_price, Price(99));
        assert_eq!(line.label, "Social Download");
        assert_eq!(line.thumbnail_url, "file:///display/p1");

        event.pricing.social = Price(499);
        assert_eq!(cart.items()[0].unit_price, Price(99));
        assert_eq!(cart.total(), Price(99));
    }

    #[test]
    fn test_duplicate_line_ignored() {
        let event = event();
        let mut cart = Cart::new();
        assert!(cart.add_photo(&event, &photo("p1"), PurchaseTier::Print).is_some());
        assert!(cart.add_photo(&event, &photo("p1"), PurchaseTier::Print).is_none());
        assert!(cart.add_photo(&event, &photo("p1"), PurchaseTier::RemixCredit).is_some());
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.total(), Price(999 + 100));
    }

    #[test]
    fn test_checkout_resets() {
        let event = event();
        let mut cart = Cart::new();
        cart.add_photo(&event, &photo("p1"), PurchaseTier::Original);
        cart.add_photo(&event, &photo("p2"), PurchaseTier::Original);

        let purchased = cart.complete_checkout();
        assert_eq!(purchased.len(), 2);
        assert_eq!(cart.item_count(), 0);
        assert_eq!(cart.total(), Price(0));
    }

    #[test]
    fn test_clear() {
        let mut cart = Cart::new();
        cart.add_photo(&event(), &photo("p1"), PurchaseTier::Social);
        cart.clear();
        assert!(cart.items().is_empty());
    }
}
