use std::env;

/// Extra fields merged into every shipped record (host, version, environment...)
pub trait AppendFields: Send + Sync + 'static {
    fn fields(&self) -> Vec<(String, String)>;
}

impl<F> AppendFields for F
where
    F: Fn() -> Vec<(String, String)> + Send + Sync + 'static,
{
    fn fields(&self) -> Vec<(String, String)> {
        self()
    }
}

#[derive(Debug, Clone, Default)]
pub enum AppendFieldsStrategies {
    #[default]
    NoFields,
    Static(Vec<(String, String)>),
}

impl AppendFieldsStrategies {
    /// Fields describing the running process: `host`, `version` and `environment`.
    pub fn host_metadata(version: impl Into<String>, environment: impl Into<String>) -> Self {
        let host = env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_owned());

        AppendFieldsStrategies::Static(vec![
            ("host".to_owned(), host),
            ("version".to_owned(), version.into()),
            ("environment".to_owned(), environment.into()),
        ])
    }
}

impl AppendFields for AppendFieldsStrategies {
    fn fields(&self) -> Vec<(String, String)> {
        match self {
            AppendFieldsStrategies::NoFields => Vec::new(),
            AppendFieldsStrategies::Static(fields) => fields.clone(),
        }
    }
}

#[cfg(test)]
mod strategies_tests {
    use crate::strategies::*;

    #[test]
    fn test_no_fields() {
        assert!(AppendFieldsStrategies::default().fields().is_empty());
    }

    #[test]
    fn test_host_metadata() {
        let fields = AppendFieldsStrategies::host_metadata("1.2.3", "staging").fields();
        let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();

        assert_eq!(keys, ["host", "version", "environment"]);
        assert_eq!(fields[1].1, "1.2.3");
        assert_eq!(fields[2].1, "staging");
    }

    #[test]
    fn test_closure_fields() {
        let provider = || vec![("pid".to_owned(), "7".to_owned())];
        assert_eq!(provider.fields(), [("pid".to_owned(), "7".to_owned())]);
    }
}
