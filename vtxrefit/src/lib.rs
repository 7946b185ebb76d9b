// src/lib.rs
pub mod data {
    pub mod io;
}

pub mod sim {
    pub mod generator;
}

pub mod run;
pub mod logging;
