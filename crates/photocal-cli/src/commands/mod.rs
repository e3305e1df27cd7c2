pub mod info;
pub mod masters;
pub mod run;
