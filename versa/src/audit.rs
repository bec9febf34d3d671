use crate::errors::VersaResult;

/// Logs entry, success and failure of an action.
///
/// ```rust,ignore
/// let user = Audit::new("create user")
///     .with_params(&format!("{:?}", request))
///     .run(|| service.create_user(request))?;
/// ```
#[derive(Debug, Clone)]
pub struct Audit {
    action: String,
    params: Option<String>,
}

impl Audit {
    pub fn new(action: &str) -> Self {
        Audit {
            action: action.to_string(),
            params: None,
        }
    }

    /// Includes a description of the call arguments in the entry line.
    pub fn with_params(mut self, params: &str) -> Self {
        self.params = Some(params.to_string());
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Runs `operation` and returns its result unchanged.
    pub fn run<R, F>(&self, operation: F) -> VersaResult<R>
    where
        F: FnOnce() -> VersaResult<R>,
    {
        match &self.params {
            Some(params) => log::info!("AUDIT: {} called with parameters: {}", self.action, params),
            None => log::info!("AUDIT: {} called", self.action),
        }

        let result = operation();
        match &result {
            Ok(_) => log::info!("AUDIT: {} completed successfully", self.action),
            Err(err) => log::error!("AUDIT: {} failed with exception: {}", self.action, err),
        }
        result
    }
}
