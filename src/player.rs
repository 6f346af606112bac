use anyhow::Result;

use crate::types::PlayerSnapshot;

/// Source of playback status and current-song metadata.
///
/// Both `Err` and `Ok(None)` mean "nothing is playing" to the caller; a
/// backend failure never stops the presence loop.
pub trait PlayerBackend {
    /// Returns the name of this backend (for logging)
    fn name(&self) -> &'static str;

    /// Fetch a fresh snapshot
    fn query(&mut self) -> Result<Option<PlayerSnapshot>>;
}
