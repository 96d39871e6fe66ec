/// Tenant scope for every backend call.
///
/// Built once from configuration and passed explicitly, so nothing reads
/// session state from ambient globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub entity_id: Option<String>,
    pub token: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_id: None,
            token: None,
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn scope_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("tenant_id", self.tenant_id.as_str())];
        if let Some(entity_id) = self.entity_id.as_deref() {
            params.push(("entity_id", entity_id));
        }
        params
    }
}
