// data module
pub mod data {
    pub mod kinematics;
    pub mod candidate;
    pub mod track;
    pub mod vertex;
    pub mod event;
}

// algorithm module
pub mod algorithm {
    pub mod combinations;
    pub mod pair_gate;
    pub mod track_exclusion;
    pub mod transient_track;
    pub mod adaptive_fitter;
}

// refit module
pub mod refit {
    pub mod config;
    pub mod error;
    pub mod refitter;
    pub mod sink;
    pub mod producer;
}
