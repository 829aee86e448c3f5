use crate::models::RecordKind;
use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::{Value, json};

pub const ORDERS_SCHEMA_ID: &str = "urn:synthstore:schema:orders:v1";
pub const ADJUSTMENTS_SCHEMA_ID: &str = "urn:synthstore:schema:inventory-adjustments:v1";

pub const MIN_LINE_QUANTITY: u32 = 1;
pub const MAX_LINE_QUANTITY: u32 = 5;
pub const MAX_LINE_ITEMS: usize = 5;
pub const MIN_ADJUSTMENT: i32 = -5;
pub const MAX_ADJUSTMENT: i32 = 10;

pub const VARIANT_GID_PATTERN: &str = "^gid://[^/]+/ProductVariant/[0-9]+$";
pub const PRODUCT_GID_PATTERN: &str = "^gid://[^/]+/Product/[0-9]+$";

static ORDERS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": ORDERS_SCHEMA_ID,
        "type": "object",
        "required": ["orders"],
        "properties": {
            "orders": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["email", "lineItems", "shippingAddress", "createdAt"],
                    "properties": {
                        "email": {
                            "type": "string",
                            "pattern": "^[^@\\s]+@[^@\\s]+\\.[^@\\s]+$"
                        },
                        "lineItems": {
                            "type": "array",
                            "minItems": 1,
                            "maxItems": MAX_LINE_ITEMS,
                            "items": {
                                "type": "object",
                                "required": ["variantId", "quantity"],
                                "properties": {
                                    "variantId": {
                                        "type": "string",
                                        "pattern": VARIANT_GID_PATTERN
                                    },
                                    "quantity": {
                                        "type": "integer",
                                        "minimum": MIN_LINE_QUANTITY,
                                        "maximum": MAX_LINE_QUANTITY
                                    },
                                    "taxable": {"type": "boolean"}
                                },
                                "additionalProperties": false
                            }
                        },
                        "shippingAddress": {
                            "type": "object",
                            "required": ["firstName", "lastName", "address1", "city", "countryCode", "zip"],
                            "properties": {
                                "firstName": {"type": "string", "minLength": 1},
                                "lastName": {"type": "string", "minLength": 1},
                                "address1": {"type": "string", "minLength": 1},
                                "address2": {"type": "string"},
                                "city": {"type": "string", "minLength": 1},
                                "provinceCode": {"type": "string"},
                                "countryCode": {"type": "string", "pattern": "^[A-Z]{2}$"},
                                "zip": {"type": "string", "minLength": 1},
                                "phone": {"type": "string"}
                            }
                        },
                        "note": {"type": "string"},
                        "createdAt": {"type": "string", "format": "date-time"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "customAttributes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["key", "value"],
                                "properties": {
                                    "key": {"type": "string"},
                                    "value": {"type": "string"}
                                }
                            }
                        }
                    }
                }
            }
        }
    })
});

static ADJUSTMENTS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": ADJUSTMENTS_SCHEMA_ID,
        "type": "object",
        "required": ["adjustments"],
        "properties": {
            "adjustments": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["variant_id", "product_id", "adjustment", "reason", "timestamp"],
                    "properties": {
                        "variant_id": {"type": "string", "pattern": VARIANT_GID_PATTERN},
                        "product_id": {"type": "string", "pattern": PRODUCT_GID_PATTERN},
                        "adjustment": {
                            "type": "integer",
                            "minimum": MIN_ADJUSTMENT,
                            "maximum": MAX_ADJUSTMENT
                        },
                        "reason": {
                            "type": "string",
                            "enum": ["recount", "received", "damaged", "sold"]
                        },
                        "timestamp": {"type": "string", "format": "date-time"}
                    },
                    "additionalProperties": false
                }
            }
        }
    })
});

static ORDERS_VALIDATOR: Lazy<Result<Validator, String>> = Lazy::new(|| compile(&ORDERS_SCHEMA));
static ADJUSTMENTS_VALIDATOR: Lazy<Result<Validator, String>> =
    Lazy::new(|| compile(&ADJUSTMENTS_SCHEMA));

fn compile(schema: &Value) -> Result<Validator, String> {
    jsonschema::draft202012::options()
        .build(schema)
        .map_err(|err| err.to_string())
}

/// The fixed response schema for a record kind. Never depends on catalog
/// content, so the same document validates output for every store.
pub fn response_schema(kind: RecordKind) -> &'static Value {
    match kind {
        RecordKind::Orders => &ORDERS_SCHEMA,
        RecordKind::InventoryAdjustments => &ADJUSTMENTS_SCHEMA,
    }
}

pub fn schema_id(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Orders => ORDERS_SCHEMA_ID,
        RecordKind::InventoryAdjustments => ADJUSTMENTS_SCHEMA_ID,
    }
}

fn validator(kind: RecordKind) -> Result<&'static Validator, String> {
    match kind {
        RecordKind::Orders => ORDERS_VALIDATOR.as_ref(),
        RecordKind::InventoryAdjustments => ADJUSTMENTS_VALIDATOR.as_ref(),
    }
    .map_err(|err| format!("schema `{}` failed to compile: {err}", schema_id(kind)))
}

pub fn ensure_compiled(kind: RecordKind) -> Result<(), String> {
    validator(kind).map(|_| ())
}

/// Validates `instance` and returns every violation, at most `limit` of them.
pub fn violations(kind: RecordKind, instance: &Value, limit: usize) -> Result<Vec<String>, String> {
    Ok(validator(kind)?
        .iter_errors(instance)
        .take(limit)
        .map(|err| err.to_string())
        .collect())
}
