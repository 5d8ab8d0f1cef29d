use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use sapl_pdp::{CompiledPdpVoter, PdpConfiguration, PipAttributeBroker, Settings, StandardFunctionBroker};

use super::read_json;
use crate::output::print_success;

pub fn check(path: &Path, settings: &Settings) -> Result<()> {
    let compiled = compile(path, settings)?;
    print_success(&format!(
        "Configuration {} for {} compiles: {} documents, algorithm {}",
        compiled.configuration_id.cyan(),
        compiled.pdp_id.cyan(),
        compiled.documents.len(),
        compiled.algorithm
    ));
    Ok(())
}

/// Compiles the configuration at `path` without loading it anywhere.
pub fn compile(path: &Path, settings: &Settings) -> Result<CompiledPdpVoter> {
    let configuration: PdpConfiguration = read_json(path, "configuration")?;
    CompiledPdpVoter::compile(
        &configuration,
        Arc::new(StandardFunctionBroker::new()),
        Arc::new(PipAttributeBroker::new()),
        &settings.attributes.to_options_value(),
    )
    .with_context(|| format!("Configuration '{}' was rejected", configuration.configuration_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_configuration_compiles() {
        let file = write(
            r#"{
                "pdpId": "default",
                "configurationId": "v1",
                "algorithm": "deny-overrides",
                "documents": [
                    {"element": {"type": "policy", "name": "open", "entitlement": "permit"}}
                ]
            }"#,
        );
        let compiled = compile(file.path(), &Settings::default()).unwrap();
        assert_eq!(compiled.documents.len(), 1);
        assert!(check(file.path(), &Settings::default()).is_ok());
    }

    #[test]
    fn test_first_applicable_is_rejected() {
        let file = write(r#"{"pdpId": "default", "configurationId": "v1", "algorithm": "first-applicable"}"#);
        let error = compile(file.path(), &Settings::default()).unwrap_err();
        assert!(format!("{error:#}").contains("'v1' was rejected"));
    }

    #[test]
    fn test_malformed_json_names_the_file() {
        let file = write("{ not json");
        let error = compile(file.path(), &Settings::default()).unwrap_err();
        assert!(error.to_string().contains("Invalid configuration JSON"));
    }
}
