//! Query constraints applied to a metrics fetch.

/// Optional constraints for the data-endpoint query.
///
/// An absent key leaves that dimension unconstrained. A `FilterSpec` is
/// immutable per fetch; installing a new value starts a new fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub project_id: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub created_by: Option<String>,
    pub created_on_gt: Option<String>,
    pub created_on_lt: Option<String>,
    pub created_on_eq: Option<String>,
}

impl FilterSpec {
    /// Query-parameter pairs for the data endpoint, populated keys only.
    pub fn query_params(&self) -> Vec<(&'static str, &str)> {
        let pairs = [
            ("project_id", &self.project_id),
            ("status", &self.status),
            ("owner", &self.owner),
            ("created_by", &self.created_by),
            ("created_on_gt", &self.created_on_gt),
            ("created_on_lt", &self.created_on_lt),
            ("created_on_eq", &self.created_on_eq),
        ];

        let mut params = Vec::new();
        for (key, value) in pairs {
            if let Some(value) = value {
                params.push((key, value.as_str()));
            }
        }
        params
    }
}
