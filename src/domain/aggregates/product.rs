//! Product Aggregate
//!
//! A product together with the variant a cart line chose, as the order
//! workflow sees it.

use crate::{Money, Product, ProductType, ProductVariant, Result, StorefrontError};

#[derive(Clone, Debug)]
pub struct CatalogItem {
    pub product: Product,
    pub variant: Option<ProductVariant>,
}

impl CatalogItem {
    /// Pairs a product with its variant, rejecting inactive or mismatched rows.
    pub fn new(product: Product, variant: Option<ProductVariant>) -> Result<Self> {
        if !product.is_active {
            return Err(StorefrontError::ProductInactive(product.id));
        }
        if let Some(v) = &variant {
            if v.product_id != product.id {
                return Err(StorefrontError::VariantNotFound(v.id));
            }
            if !v.is_active {
                return Err(StorefrontError::ProductInactive(v.id));
            }
        }
        Ok(Self { product, variant })
    }

    pub fn product_id(&self) -> uuid::Uuid { self.product.id }
    pub fn variant_id(&self) -> Option<uuid::Uuid> { self.variant.as_ref().map(|v| v.id) }
    pub fn product_type(&self) -> ProductType { self.product.product_type }

    /// Variant price when a variant is chosen, else the product's base price.
    pub fn base_price(&self) -> Money {
        match &self.variant {
            Some(v) if v.is_active => Money::new(v.price),
            _ => Money::new(self.product.price),
        }
    }

    pub fn is_unlimited(&self) -> bool { self.variant.as_ref().map(|v| v.is_unlimited).unwrap_or(false) }

    /// Counted, consumable stock is only needed for non-unlimited account products.
    pub fn requires_stock(&self) -> bool { self.product.product_type.is_inventory_bearing() && !self.is_unlimited() }

    pub fn warranty_days(&self) -> Option<i32> {
        self.variant.as_ref().and_then(|v| v.warranty_days).or(self.product.warranty_days)
    }
}
