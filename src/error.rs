use thiserror::Error;

/// Everything that can go wrong inside the engine.
///
/// None of these are fatal: the engine logs them and keeps the rig in its
/// previous pose.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no clip matches `{clip}` for animation state `{state}`")]
    MissingClip { state: String, clip: String },

    #[error("unknown animation state `{0}`")]
    UnknownState(String),

    #[error("unknown expression `{0}`")]
    UnknownExpression(String),

    #[error("unknown gesture `{0}`")]
    UnknownGesture(String),

    #[error("animation state machine is held in `{0}`")]
    StateLocked(String),

    #[error("rig has no {0}")]
    DegenerateRig(&'static str),

    #[error("no JSON object found in input")]
    NoJsonObject,

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    /// Missing bindings and unknown names, as opposed to malformed input
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::NoJsonObject | EngineError::Parse { .. })
    }
}
