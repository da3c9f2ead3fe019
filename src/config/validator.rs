use crate::config::{Properties, SERVER_READY_PATH_PREFIX, SetupConfig};
use crate::error::{Error, Result};
use crate::readiness::ReadyPath;

/// Validates the readiness path specifications.
///
/// At setup time a malformed path is only logged and skipped; this check
/// lets a standalone run refuse such a configuration up front.
pub fn validate_ready_paths(props: &Properties) -> Result<()> {
    let errors: Vec<String> = props
        .with_prefix(SERVER_READY_PATH_PREFIX)
        .filter_map(|(key, spec)| {
            ReadyPath::parse(spec)
                .err()
                .map(|e| format!("{}: {}", key, e))
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::ConfigInvalid(errors.join("; ")))
    }
}

/// Full configuration validation
pub fn validate_properties(props: &Properties) -> Result<()> {
    // Numbers and the timeout multiplier
    SetupConfig::from_properties(props)?;

    validate_ready_paths(props)?;

    Ok(())
}
