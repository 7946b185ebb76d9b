use thiserror::Error;

/// Errors that make a whole event unprocessable.
#[derive(Debug, Error)]
pub enum RefitError {
    #[error("event has no {kind} product for input tag `{tag}`")]
    MissingProduct { kind: &'static str, tag: String },

    #[error("primary vertex collection `{tag}` is empty")]
    EmptyVertexCollection { tag: String },

    #[error("candidate {product}[{key}] with pdg id {pdg_id} is neither electron nor muon but carries no tau decay products")]
    MissingSignalCandidates { product: String, key: usize, pdg_id: i32 },

    #[error("could not build thread pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid input tag `{0}`, expected label[:instance[:process]]")]
    InvalidInputTag(String),

    #[error("{name} must be a finite, non-negative number, got {value}")]
    InvalidTolerance { name: &'static str, value: f64 },

    #[error("combineNLeptons must be at least 1")]
    InvalidArity,

    #[error("srcLeptons must name at least one collection")]
    NoLeptonSources,
}

/// Failures of the numerical vertex fit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("at least 2 tracks are required, got {found}")]
    TooFewTracks { found: usize },

    #[error("normal matrix of the fit is singular")]
    Singular,

    #[error("fit did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("fit produced a non-finite vertex position")]
    NonFinite,

    #[error("only {compatible} tracks have weight >= {threshold}, at least 2 are required")]
    InsufficientCompatibleTracks { compatible: usize, threshold: f64 },

    #[error("beam spot widths must be finite and strictly positive")]
    InvalidBeamSpot,
}

/// Reasons a reconstructed track cannot be turned into a fitter track.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackBuildError {
    #[error("track momentum is zero or not finite")]
    DegenerateMomentum,

    #[error("track reference point is not finite")]
    NonFiniteReferencePoint,

    #[error("track position uncertainties must be positive (transverse {transverse}, longitudinal {longitudinal})")]
    InvalidUncertainty { transverse: f64, longitudinal: f64 },
}
