//! Dry-run simulation of actions.
//!
//! `simulate` predicts what an invocation would do without committing
//! anything: no inventory decrement, no payment capture, no store write.
//! Agents use it to preview an execute-tier action before calling the
//! real path with `confirmed: true`.

use serde::Serialize;
use serde_json::Value;

use crate::actions::{ActionCategory, ActionDefinition};

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub action: String,
    pub will_succeed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    pub side_effects: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_params: Vec<String>,
}

/// Predict the outcome of invoking `action` with `arguments`.
///
/// Success tracks declared-parameter completeness; cost derives from
/// `amount`/`price`/`quantity` style arguments; the side-effect list is a
/// function of the action's category. Pure: no state is read or written.
pub fn simulate(action: &ActionDefinition, arguments: &Value) -> SimulationReport {
    let missing_params: Vec<String> = action
        .params
        .iter()
        .filter(|param| param.required && param.name != "confirmed")
        .filter(|param| arguments.get(&param.name).is_none())
        .map(|param| param.name.clone())
        .collect();

    let estimated_cost = estimate_cost(arguments);

    let side_effects = match action.category {
        ActionCategory::Catalog => Vec::new(),
        ActionCategory::Order => {
            let mut effects = vec!["inventory reservation".to_string()];
            if estimated_cost.is_some() {
                effects.push("payment capture".to_string());
            }
            effects.push("order record creation".to_string());
            effects
        }
        ActionCategory::Account => vec!["profile mutation".to_string()],
    };

    SimulationReport {
        action: action.name.clone(),
        will_succeed: missing_params.is_empty(),
        estimated_cost,
        side_effects,
        missing_params,
    }
}

fn estimate_cost(arguments: &Value) -> Option<f64> {
    let amount = arguments
        .get("amount")
        .or_else(|| arguments.get("price"))
        .and_then(Value::as_f64);
    let quantity = arguments.get("quantity").and_then(Value::as_f64);
    match (amount, quantity) {
        (Some(amount), Some(quantity)) => Some(amount * quantity),
        (Some(amount), None) => Some(amount),
        (None, Some(_)) | (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::default_catalog;
    use serde_json::json;

    #[test]
    fn complete_arguments_predict_success() {
        let catalog = default_catalog();
        let action = catalog.find("create_order").unwrap();
        let report = simulate(action, &json!({"product_id": "p-1", "quantity": 2, "amount": 19.5}));
        assert!(report.will_succeed);
        assert_eq!(report.estimated_cost, Some(39.0));
        assert!(report.side_effects.iter().any(|e| e.contains("payment")));
        assert!(report.missing_params.is_empty());
    }

    #[test]
    fn missing_required_params_predict_failure() {
        let catalog = default_catalog();
        let action = catalog.find("create_order").unwrap();
        let report = simulate(action, &json!({"quantity": 1}));
        assert!(!report.will_succeed);
        assert_eq!(report.missing_params, vec!["product_id".to_string()]);
    }

    #[test]
    fn confirmed_flag_is_not_a_simulation_requirement() {
        let catalog = default_catalog();
        let action = catalog.find("cancel_order").unwrap();
        let report = simulate(action, &json!({"order_id": "o-9"}));
        assert!(report.will_succeed);
    }

    #[test]
    fn read_actions_have_no_side_effects() {
        let catalog = default_catalog();
        let action = catalog.find("search_products").unwrap();
        let report = simulate(action, &json!({"query": "lamp"}));
        assert!(report.side_effects.is_empty());
        assert_eq!(report.estimated_cost, None);
    }
}
