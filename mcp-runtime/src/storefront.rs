//! In-memory storefront backing the reference tool surface.
//!
//! This is the "web service" the gateway mediates access to. Executing an
//! action here is the committed side effect the confirmation gate and the
//! sandbox exist to protect: `create_order` decrements stock and records
//! the order, `cancel_order` restocks. Everything lives behind `RwLock`s
//! so concurrent tool calls stay consistent.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use gatehouse_core::actions::ActionDefinition;

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: u32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Placed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub agent_id: Uuid,
    pub product_id: String,
    pub quantity: u32,
    pub total: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Conflict(String),
    #[error("action '{0}' has no handler")]
    Unhandled(String),
}

impl ExecuteError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecuteError::NotFound(_) => gatehouse_core::error::codes::NOT_FOUND,
            ExecuteError::InvalidArguments(_) => gatehouse_core::error::codes::VALIDATION_FAILED,
            ExecuteError::Conflict(_) => gatehouse_core::error::codes::VALIDATION_FAILED,
            ExecuteError::Unhandled(_) => gatehouse_core::error::codes::INTERNAL_ERROR,
        }
    }
}

/// Executes resolved, authorized, confirmed actions against backing state.
pub trait ActionExecutor: Send + Sync {
    fn execute(
        &self,
        agent_id: Uuid,
        action: &ActionDefinition,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ExecuteError>;

    /// Read-only snapshot used by the resource surface.
    fn catalog_snapshot(&self) -> Value;
}

/// The in-memory reference storefront.
pub struct Storefront {
    products: RwLock<Vec<Product>>,
    orders: RwLock<HashMap<String, Order>>,
    carts: RwLock<HashMap<Uuid, HashMap<String, u32>>>,
    preferences: RwLock<HashMap<Uuid, Value>>,
}

impl Storefront {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: RwLock::new(products),
            orders: RwLock::new(HashMap::new()),
            carts: RwLock::new(HashMap::new()),
            preferences: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_demo_inventory() -> Self {
        Self::new(vec![
            Product {
                id: "p-1001".to_string(),
                name: "Walnut desk lamp".to_string(),
                description: "Dimmable desk lamp with a walnut base.".to_string(),
                price: 89.0,
                stock: 24,
                tags: vec!["lighting".to_string(), "desk".to_string()],
            },
            Product {
                id: "p-1002".to_string(),
                name: "Felt keyboard mat".to_string(),
                description: "Wool felt mat, 900x400mm.".to_string(),
                price: 32.5,
                stock: 120,
                tags: vec!["desk".to_string(), "accessory".to_string()],
            },
            Product {
                id: "p-1003".to_string(),
                name: "Mechanical keyboard".to_string(),
                description: "75% layout, hot-swappable switches.".to_string(),
                price: 249.0,
                stock: 8,
                tags: vec!["keyboard".to_string(), "input".to_string()],
            },
        ])
    }

    fn search(&self, query: &str, max_price: Option<f64>) -> Vec<Product> {
        let needle = query.trim().to_lowercase();
        let products = self.products.read().unwrap_or_else(|e| e.into_inner());
        products
            .iter()
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
                    || p.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .filter(|p| max_price.is_none_or(|max| p.price <= max))
            .cloned()
            .collect()
    }

    fn get(&self, product_id: &str) -> Option<Product> {
        let products = self.products.read().unwrap_or_else(|e| e.into_inner());
        products.iter().find(|p| p.id == product_id).cloned()
    }

    fn place_order(
        &self,
        agent_id: Uuid,
        product_id: &str,
        quantity: u32,
    ) -> Result<Order, ExecuteError> {
        if quantity == 0 {
            return Err(ExecuteError::InvalidArguments(
                "quantity must be at least 1".to_string(),
            ));
        }
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        let product = products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| ExecuteError::NotFound(format!("product '{product_id}' not found")))?;
        if product.stock < quantity {
            return Err(ExecuteError::Conflict(format!(
                "only {} units of '{}' in stock",
                product.stock, product.id
            )));
        }
        product.stock -= quantity;
        let order = Order {
            id: format!("o-{}", Uuid::now_v7().simple()),
            agent_id,
            product_id: product.id.clone(),
            quantity,
            total: product.price * f64::from(quantity),
            status: OrderStatus::Placed,
            created_at: Utc::now(),
        };
        let mut orders = self.orders.write().unwrap_or_else(|e| e.into_inner());
        orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    fn cancel_order(&self, agent_id: Uuid, order_id: &str) -> Result<Order, ExecuteError> {
        let mut orders = self.orders.write().unwrap_or_else(|e| e.into_inner());
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ExecuteError::NotFound(format!("order '{order_id}' not found")))?;
        if order.agent_id != agent_id {
            // Do not reveal other agents' orders.
            return Err(ExecuteError::NotFound(format!("order '{order_id}' not found")));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ExecuteError::Conflict(format!(
                "order '{order_id}' is already cancelled"
            )));
        }
        order.status = OrderStatus::Cancelled;
        let restocked = order.clone();
        drop(orders);

        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        if let Some(product) = products.iter_mut().find(|p| p.id == restocked.product_id) {
            product.stock += restocked.quantity;
        }
        Ok(restocked)
    }

    fn update_cart(
        &self,
        agent_id: Uuid,
        product_id: &str,
        quantity: u32,
    ) -> Result<Value, ExecuteError> {
        if self.get(product_id).is_none() {
            return Err(ExecuteError::NotFound(format!(
                "product '{product_id}' not found"
            )));
        }
        let mut carts = self.carts.write().unwrap_or_else(|e| e.into_inner());
        let cart = carts.entry(agent_id).or_default();
        if quantity == 0 {
            cart.remove(product_id);
        } else {
            cart.insert(product_id.to_string(), quantity);
        }
        let lines: Vec<Value> = cart
            .iter()
            .map(|(id, qty)| json!({"product_id": id, "quantity": qty}))
            .collect();
        Ok(json!({"lines": lines}))
    }

    fn update_preferences(&self, agent_id: Uuid, preferences: Value) -> Value {
        let mut all = self.preferences.write().unwrap_or_else(|e| e.into_inner());
        all.insert(agent_id, preferences.clone());
        json!({"preferences": preferences})
    }

    #[cfg(test)]
    pub fn order_count(&self) -> usize {
        self.orders.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub fn stock_of(&self, product_id: &str) -> Option<u32> {
        self.get(product_id).map(|p| p.stock)
    }
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ExecuteError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ExecuteError::InvalidArguments(format!("'{key}' must be a string")))
}

fn required_quantity(arguments: &Map<String, Value>) -> Result<u32, ExecuteError> {
    let raw = arguments
        .get("quantity")
        .and_then(Value::as_f64)
        .ok_or_else(|| ExecuteError::InvalidArguments("'quantity' must be a number".to_string()))?;
    if raw < 0.0 || raw.fract() != 0.0 || raw > f64::from(u32::MAX) {
        return Err(ExecuteError::InvalidArguments(
            "'quantity' must be a non-negative integer".to_string(),
        ));
    }
    Ok(raw as u32)
}

impl ActionExecutor for Storefront {
    fn execute(
        &self,
        agent_id: Uuid,
        action: &ActionDefinition,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ExecuteError> {
        match action.name.as_str() {
            "search_products" => {
                let query = required_str(arguments, "query")?;
                let max_price = arguments.get("max_price").and_then(Value::as_f64);
                let results = self.search(query, max_price);
                Ok(json!({"count": results.len(), "products": results}))
            }
            "get_product" => {
                let product_id = required_str(arguments, "product_id")?;
                let product = self.get(product_id).ok_or_else(|| {
                    ExecuteError::NotFound(format!("product '{product_id}' not found"))
                })?;
                Ok(serde_json::to_value(product).unwrap_or(Value::Null))
            }
            "update_cart" => {
                let product_id = required_str(arguments, "product_id")?;
                let quantity = required_quantity(arguments)?;
                self.update_cart(agent_id, product_id, quantity)
            }
            "create_order" => {
                let product_id = required_str(arguments, "product_id")?;
                let quantity = required_quantity(arguments)?;
                let order = self.place_order(agent_id, product_id, quantity)?;
                Ok(serde_json::to_value(order).unwrap_or(Value::Null))
            }
            "cancel_order" => {
                let order_id = required_str(arguments, "order_id")?;
                let order = self.cancel_order(agent_id, order_id)?;
                Ok(serde_json::to_value(order).unwrap_or(Value::Null))
            }
            "update_profile" => {
                let preferences = arguments
                    .get("preferences")
                    .cloned()
                    .ok_or_else(|| {
                        ExecuteError::InvalidArguments("'preferences' is required".to_string())
                    })?;
                Ok(self.update_preferences(agent_id, preferences))
            }
            other => Err(ExecuteError::Unhandled(other.to_string())),
        }
    }

    fn catalog_snapshot(&self) -> Value {
        let products = self.products.read().unwrap_or_else(|e| e.into_inner());
        json!({
            "generated_at": Utc::now(),
            "count": products.len(),
            "products": *products,
        })
    }
}
