/// Stable merge key for a printer: `port:name`.
///
/// Repeated sightings of the same physical device resolve to the same key,
/// and the key survives restarts because both parts are persisted.
pub fn device_identity(port: u16, name: &str) -> String {
    format!("{}:{}", port, name)
}
