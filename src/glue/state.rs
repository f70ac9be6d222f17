use serde::Serialize;

/// Lifecycle of the pipeline, gated on consent.
///
/// `Uninitialized -> AwaitingConsent` on init without consent,
/// `AwaitingConsent -> Active` once consent is given, `Active <-> Paused` on
/// host signals, and back to `Uninitialized` only through cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GlueState {
    #[default]
    Uninitialized,
    AwaitingConsent,
    Active,
    Paused,
}

impl GlueState {
    pub fn is_collecting(&self) -> bool {
        *self == GlueState::Active
    }
}
