//! OData collection queries
//!
//! A `CollectionQuery` is the base query handed to the paged fetcher: the
//! collection path plus `$filter`, `$select`, `$orderby` and an
//! explicit `$top` page size. Parameter values are percent-encoded when the
//! endpoint is rendered, so OData literals may carry `#`, `&` or `+`.

/// Largest `$top` most Graph collections accept
pub const MAX_PAGE_SIZE: u32 = 999;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionQuery {
    pub path: String,
    pub filters: Vec<String>,
    pub select: Vec<&'static str>,
    pub order_by: Option<String>,
    pub top: Option<u32>,
    /// Route to the beta endpoint
    pub beta: bool,
}

impl CollectionQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, clause: impl Into<String>) -> Self {
        self.filters.push(clause.into());
        self
    }

    pub fn select(mut self, fields: &[&'static str]) -> Self {
        self.select.extend_from_slice(fields);
        self
    }

    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    /// Request an explicit page size, clamped to `1..=MAX_PAGE_SIZE`
    pub fn page_size(mut self, top: u32) -> Self {
        self.top = Some(top.clamp(1, MAX_PAGE_SIZE));
        self
    }

    pub fn beta(mut self) -> Self {
        self.beta = true;
        self
    }

    /// Relative endpoint including the query string, e.g. `users?$select=id&$top=999`
    pub fn to_endpoint(&self) -> String {
        let mut params: Vec<String> = Vec::new();

        if !self.filters.is_empty() {
            let filter = self.filters.join(" and ");
            params.push(format!("$filter={}", urlencoding::encode(&filter)));
        }

        if !self.select.is_empty() {
            let select = self.select.join(",");
            params.push(format!("$select={}", urlencoding::encode(&select)));
        }

        if let Some(order) = &self.order_by {
            params.push(format!("$orderby={}", urlencoding::encode(order)));
        }

        if let Some(top) = self.top {
            params.push(format!("$top={}", top));
        }

        let path = self.path.trim_start_matches('/');
        if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, params.join("&"))
        }
    }
}

/// Quote a value for use inside an OData string literal
pub fn odata_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Percent-encode a key used as a path segment (`users/{key}`)
pub fn path_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}
