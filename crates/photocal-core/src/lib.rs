pub mod error;
pub mod consts;
pub mod frame;
pub mod io;
pub mod classify;
pub mod combine;
pub mod mask;
pub mod calibrate;
pub mod cosmic;
pub mod manifest;
pub mod solver;
pub mod batch;
