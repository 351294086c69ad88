use std::collections::BTreeMap;

use crate::version::normalize;

/// Max length of a Service name (DNS-1035 label).
pub const MAX_ENDPOINT_NAME_LEN: usize = 63;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("version token '{0}' must be non-empty and contain only [a-z0-9]")]
    InvalidToken(String),
    #[error("app name '{0}' must be a lowercase DNS label starting with a letter")]
    InvalidApp(String),
    #[error("derived name '{0}' exceeds {max} characters", max = MAX_ENDPOINT_NAME_LEN)]
    TooLong(String),
}

/// Label keys, annotation keys and suffixes used to derive resource identity.
///
/// Passed explicitly to every function that builds names so that the whole
/// scheme lives in one immutable value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Naming {
    pub app_label: String,
    pub version_label: String,
    pub managed_by_label: String,
    pub managed_by: String,
    pub deployed_at_annotation: String,
    pub endpoint_suffix: String,
    pub route_suffix: String,
    pub path_prefix: String,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            app_label: "app".into(),
            version_label: "version".into(),
            managed_by_label: "app.kubernetes.io/managed-by".into(),
            managed_by: "simpleapi-operator".into(),
            deployed_at_annotation: "lastDeployedAt".into(),
            endpoint_suffix: "-svc".into(),
            route_suffix: "-route".into(),
            path_prefix: "/api/".into(),
        }
    }
}

impl Naming {
    pub fn with_path_prefix(mut self, prefix: &str) -> Self {
        let mut p = prefix.trim().to_string();
        if !p.starts_with('/') {
            p.insert(0, '/');
        }
        if !p.ends_with('/') {
            p.push('/');
        }
        self.path_prefix = p;
        self
    }

    /// `<app>-<version>`
    pub fn workload_name(&self, app: &str, version: &str) -> String {
        format!("{}-{}", app, normalize(version))
    }

    /// `<app>-<version>-svc`
    pub fn endpoint_name(&self, app: &str, version: &str) -> String {
        format!("{}{}", self.workload_name(app, version), self.endpoint_suffix)
    }

    /// `<app>-route`
    pub fn route_name(&self, app: &str) -> String {
        format!("{}{}", app, self.route_suffix)
    }

    /// `/api/<version>`
    pub fn path_prefix_for(&self, version: &str) -> String {
        format!("{}{}", self.path_prefix, normalize(version))
    }

    /// Labels carried by every materialized object of one version.
    pub fn labels(&self, app: &str, version: &str) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels(app, version);
        labels.insert(self.managed_by_label.clone(), self.managed_by.clone());
        labels
    }

    /// Pod selector of one version; also the Service selector.
    pub fn selector_labels(
        &self,
        app: &str,
        version: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(self.app_label.clone(), app.to_string());
        labels.insert(self.version_label.clone(), normalize(version));
        labels
    }

    /// Label selector matching every workload/endpoint managed for `app`.
    pub fn app_selector(&self, app: &str) -> String {
        format!(
            "{}={},{}={}",
            self.app_label, app, self.managed_by_label, self.managed_by
        )
    }

    /// Recover the version token from a workload or endpoint name when the
    /// version label is missing.
    pub fn version_from_name(&self, app: &str, name: &str) -> Option<String> {
        let rest = name.strip_prefix(app)?.strip_prefix('-')?;
        let rest = rest.strip_suffix(self.endpoint_suffix.as_str()).unwrap_or(rest);
        if rest.is_empty() || rest.contains('-') {
            return None;
        }
        Some(rest.to_string())
    }

    /// Reject inputs whose derived names would be invalid or could collide.
    ///
    /// Version tokens are restricted to `[a-z0-9]` so that the token between
    /// `<app>-` and the suffix is unambiguous.
    pub fn validate(&self, app: &str, version: &str) -> Result<(), NamingError> {
        let starts_alpha = app
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase())
            .unwrap_or(false);
        if !starts_alpha
            || app.ends_with('-')
            || !app
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(NamingError::InvalidApp(app.to_string()));
        }
        let token = normalize(version);
        if token.is_empty()
            || !token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(NamingError::InvalidToken(version.to_string()));
        }
        let endpoint = self.endpoint_name(app, &token);
        if endpoint.len() > MAX_ENDPOINT_NAME_LEN {
            return Err(NamingError::TooLong(endpoint));
        }
        Ok(())
    }
}
