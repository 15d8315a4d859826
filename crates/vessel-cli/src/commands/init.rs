//! Hidden `init` verb: the namespace-entry process.

/// Executes the hidden `init` verb.
///
/// # Errors
///
/// Only returns on failure; on success the process image is replaced by
/// the user command.
pub fn execute() -> anyhow::Result<()> {
    match vessel_runtime::init::run() {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}
