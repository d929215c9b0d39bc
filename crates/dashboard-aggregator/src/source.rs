//! Dashboard source table.

use serde_json::{json, Value};

/// One independently fetched dashboard section and the value shown when its
/// fetch fails.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSource {
    pub name: String,
    pub default: Value,
}

impl DashboardSource {
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }

    /// Backend route: `/dashboard/<name>`.
    pub fn path(&self) -> String {
        format!("/dashboard/{}", self.name)
    }
}

/// Sections of the inventory dashboard.
pub fn default_sources() -> Vec<DashboardSource> {
    vec![
        DashboardSource::new("products", json!([])),
        DashboardSource::new("low-stock", json!([])),
        DashboardSource::new(
            "inventory-stats",
            json!({
                "total_products": 0,
                "low_stock_count": 0,
                "inventory_value": 0
            }),
        ),
        DashboardSource::new("movements", json!([])),
        DashboardSource::new("category-distribution", json!([])),
        DashboardSource::new(
            "sales-summary",
            json!({
                "today_sales": 0,
                "month_sales": 0,
                "month_profit": 0
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_six_unique_sources() {
        let sources = default_sources();
        let mut names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn path_is_under_dashboard() {
        let source = DashboardSource::new("low-stock", json!([]));
        assert_eq!(source.path(), "/dashboard/low-stock");
    }
}
