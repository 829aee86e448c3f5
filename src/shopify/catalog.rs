use super::client::ShopifyClient;
use crate::commerce::CommerceError;
use crate::models::CatalogItem;
use serde_json::{Value, json};

const PRODUCTS_QUERY: &str = r#"
query Catalog($first: Int!) {
  products(first: $first, query: "status:active") {
    edges {
      node {
        id
        title
        variants(first: 50) {
          edges {
            node { id title price sku }
          }
        }
      }
    }
  }
}"#;

pub(super) async fn fetch_catalog(
    client: &ShopifyClient,
    limit: usize,
) -> Result<Vec<CatalogItem>, CommerceError> {
    let data = client
        .execute(PRODUCTS_QUERY, json!({ "first": limit.clamp(1, 250) }))
        .await?;
    Ok(flatten_products(&data, limit))
}

/// One catalog item per variant, in product order, at most `limit`.
pub(super) fn flatten_products(data: &Value, limit: usize) -> Vec<CatalogItem> {
    let products = data
        .pointer("/products/edges")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    products
        .iter()
        .filter_map(|edge| edge.get("node"))
        .flat_map(|product| {
            let product_id = str_field(product, "id");
            let product_title = str_field(product, "title");
            product
                .pointer("/variants/edges")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|edge| edge.get("node"))
                .map(move |variant| {
                    let variant_title = str_field(variant, "title");
                    let title = if variant_title.is_empty() || variant_title == "Default Title" {
                        product_title.clone()
                    } else {
                        format!("{product_title} - {variant_title}")
                    };
                    CatalogItem {
                        product_id: product_id.clone(),
                        variant_id: str_field(variant, "id"),
                        price: price_of(variant.get("price")),
                        sku: variant
                            .get("sku")
                            .and_then(Value::as_str)
                            .filter(|sku| !sku.is_empty())
                            .map(str::to_string),
                        title,
                    }
                })
        })
        .take(limit)
        .collect()
}

fn str_field(node: &Value, key: &str) -> String {
    node.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// Money comes back as a decimal string; older versions sent a number.
fn price_of(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(text)) => text.parse().unwrap_or_default(),
        Some(Value::Number(number)) => number.as_f64().unwrap_or_default(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> Value {
        json!({
            "products": {"edges": [
                {"node": {
                    "id": "gid://shopify/Product/1",
                    "title": "Tee",
                    "variants": {"edges": [
                        {"node": {"id": "gid://shopify/ProductVariant/11", "title": "Small", "price": "19.50", "sku": "TEE-S"}},
                        {"node": {"id": "gid://shopify/ProductVariant/12", "title": "Large", "price": "21.00", "sku": ""}}
                    ]}
                }},
                {"node": {
                    "id": "gid://shopify/Product/2",
                    "title": "Mug",
                    "variants": {"edges": [
                        {"node": {"id": "gid://shopify/ProductVariant/21", "title": "Default Title", "price": 8, "sku": null}}
                    ]}
                }}
            ]}
        })
    }

    #[test]
    fn variants_are_flattened_with_readable_titles() {
        let items = flatten_products(&products(), 10);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "Tee - Small");
        assert_eq!(items[0].price, 19.5);
        assert_eq!(items[0].sku.as_deref(), Some("TEE-S"));
        assert_eq!(items[1].sku, None);
        assert_eq!(items[2].title, "Mug");
        assert_eq!(items[2].product_id, "gid://shopify/Product/2");
        assert_eq!(items[2].price, 8.0);
    }

    #[test]
    fn flattening_honours_limit_and_missing_data() {
        assert_eq!(flatten_products(&products(), 2).len(), 2);
        assert!(flatten_products(&json!({}), 5).is_empty());
    }
}
