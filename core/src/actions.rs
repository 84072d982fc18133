//! Action definitions: the operator-configured surface agents can invoke.
//!
//! Each action declares the coarse permission it requires, whether it must
//! be confirmed before committing a side effect, and its parameters. The
//! protocol dispatcher derives tool input schemas from the declared
//! parameters; the guardrail engine reads the same definitions when
//! deciding whether an invocation may proceed.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::permissions::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ActionParam {
    pub fn new(name: &str, kind: ParamKind, required: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Catalog,
    Order,
    Account,
}

impl ActionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionCategory::Catalog => "catalog",
            ActionCategory::Order => "order",
            ActionCategory::Account => "account",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub required_permission: Permission,
    pub confirmation_required: bool,
    pub category: ActionCategory,
    pub params: Vec<ActionParam>,
    pub enabled: bool,
}

impl ActionDefinition {
    /// JSON Schema for the action's arguments, in the shape tool listings
    /// expect: `{type, properties, required}`.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                json!({
                    "type": param.kind.as_str(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": Value::Array(required),
        })
    }
}

/// Operator-configured action set, fixed at construction.
pub struct ActionCatalog {
    actions: Vec<ActionDefinition>,
}

impl ActionCatalog {
    pub fn new(actions: Vec<ActionDefinition>) -> Self {
        Self { actions }
    }

    /// Resolve an enabled action by name.
    pub fn find(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions
            .iter()
            .find(|action| action.enabled && action.name == name)
    }

    /// Enabled actions the given permission set is allowed to see.
    pub fn visible_to(&self, granted: &[Permission]) -> Vec<&ActionDefinition> {
        self.actions
            .iter()
            .filter(|action| action.enabled)
            .filter(|action| {
                crate::permissions::has_permission(granted, action.required_permission)
            })
            .collect()
    }

    pub fn all(&self) -> &[ActionDefinition] {
        &self.actions
    }
}

/// The reference storefront action set.
pub fn default_catalog() -> ActionCatalog {
    ActionCatalog::new(vec![
        ActionDefinition {
            id: Uuid::now_v7(),
            name: "search_products".to_string(),
            description: "Search the product catalog by keyword and optional price ceiling."
                .to_string(),
            required_permission: Permission::Read,
            confirmation_required: false,
            category: ActionCategory::Catalog,
            params: vec![
                ActionParam::new("query", ParamKind::String, true, "Search keywords"),
                ActionParam::new(
                    "max_price",
                    ParamKind::Number,
                    false,
                    "Only return products at or below this price",
                ),
            ],
            enabled: true,
        },
        ActionDefinition {
            id: Uuid::now_v7(),
            name: "get_product".to_string(),
            description: "Fetch one product by its catalog id.".to_string(),
            required_permission: Permission::Read,
            confirmation_required: false,
            category: ActionCategory::Catalog,
            params: vec![ActionParam::new(
                "product_id",
                ParamKind::String,
                true,
                "Catalog product id",
            )],
            enabled: true,
        },
        ActionDefinition {
            id: Uuid::now_v7(),
            name: "update_cart".to_string(),
            description: "Add or remove a product in the caller's cart.".to_string(),
            required_permission: Permission::Write,
            confirmation_required: false,
            category: ActionCategory::Order,
            params: vec![
                ActionParam::new("product_id", ParamKind::String, true, "Catalog product id"),
                ActionParam::new(
                    "quantity",
                    ParamKind::Number,
                    true,
                    "Desired quantity; zero removes the line",
                ),
            ],
            enabled: true,
        },
        ActionDefinition {
            id: Uuid::now_v7(),
            name: "create_order".to_string(),
            description: "Place an order for a product. Commits payment and inventory."
                .to_string(),
            required_permission: Permission::Execute,
            confirmation_required: true,
            category: ActionCategory::Order,
            params: vec![
                ActionParam::new("product_id", ParamKind::String, true, "Catalog product id"),
                ActionParam::new("quantity", ParamKind::Number, true, "Units to purchase"),
                ActionParam::new(
                    "confirmed",
                    ParamKind::Boolean,
                    false,
                    "Must be true to commit the purchase",
                ),
            ],
            enabled: true,
        },
        ActionDefinition {
            id: Uuid::now_v7(),
            name: "cancel_order".to_string(),
            description: "Cancel a previously placed order.".to_string(),
            required_permission: Permission::Execute,
            confirmation_required: true,
            category: ActionCategory::Order,
            params: vec![
                ActionParam::new("order_id", ParamKind::String, true, "Order id to cancel"),
                ActionParam::new(
                    "confirmed",
                    ParamKind::Boolean,
                    false,
                    "Must be true to commit the cancellation",
                ),
            ],
            enabled: true,
        },
        ActionDefinition {
            id: Uuid::now_v7(),
            name: "update_profile".to_string(),
            description: "Update the agent's stored delivery preferences.".to_string(),
            required_permission: Permission::Admin,
            confirmation_required: false,
            category: ActionCategory::Account,
            params: vec![ActionParam::new(
                "preferences",
                ParamKind::Object,
                true,
                "Preference document to merge",
            )],
            enabled: true,
        },
    ])
}
